pub mod auth;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod session;
pub mod settings;
pub mod state_store;
pub mod storage;

pub use auth::{AuthError, Claims, Role, TokenVerifier};
pub use errors::{ErrorResponse, ErrorSeverity, IntoErrorResponse};
pub use events::{ConnectionRegistry, ConnectionRole, SessionId};
pub use logging::{LogEntry, TestLogSubscriber, init_logging, init_test_logging};
pub use metrics::{MetricsCollector, MetricsSnapshot, RequestTimer};
pub use middleware::{RequestMetrics, log_response, with_request_logging};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{AppContext, ServerConfig, ServerError, ServerHandle, WebServer};
pub use session::{SessionActor, SessionHostError, SessionManager, now_ms};
pub use settings::{AppSettings, SettingsError, SettingsStore};
pub use state_store::{InMemoryStateStore, RedisStateStore, StateStore, StateStoreError};
pub use storage::{PgStorageAdapter, QuestionContent, StorageAdapter, StorageError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_provides_shared_components() {
        let ctx = AppContext::new_for_tests();
        assert_eq!(ctx.sessions().registry().connection_count(&"nobody".to_string()), 0);
    }
}
