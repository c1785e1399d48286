//! Wires the session-hosting layer into a `warp` HTTP/WebSocket server:
//! shared application context, route composition, and graceful shutdown.

use std::convert::Infallible;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warp::filters::BoxedFilter;
use warp::reply::Reply;
use warp::Filter;

use crate::auth::TokenVerifier;
use crate::events::ConnectionRegistry;
use crate::handlers;
use crate::metrics::MetricsCollector;
use crate::session::SessionManager;
use crate::settings::SettingsStore;
use crate::state_store::StateStore;
use crate::storage::StorageAdapter;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    host: String,
    port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn for_tests() -> Self {
        Self::new("127.0.0.1", 0)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Everything a request handler or WebSocket connection needs, shared
/// behind `Arc`s so cloning the context is cheap.
#[derive(Clone)]
pub struct AppContext {
    config: ServerConfig,
    sessions: Arc<SessionManager>,
    verifier: Arc<TokenVerifier>,
    settings: Arc<SettingsStore>,
    metrics: Arc<MetricsCollector>,
}

impl AppContext {
    pub fn new(
        config: ServerConfig,
        storage: Arc<dyn StorageAdapter>,
        state_store: Arc<dyn StateStore>,
        jwt_secret: &str,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let sessions = Arc::new(SessionManager::new(storage, state_store, registry));
        let metrics = Arc::new(MetricsCollector::new());
        sessions.registry().attach_metrics(metrics.clone());
        sessions.attach_metrics(metrics.clone());
        Self {
            config,
            sessions,
            verifier: Arc::new(TokenVerifier::new(jwt_secret)),
            settings: Arc::new(SettingsStore::new()),
            metrics,
        }
    }

    pub fn new_for_tests() -> Self {
        use crate::state_store::InMemoryStateStore;
        Self {
            config: ServerConfig::for_tests(),
            sessions: Arc::new(SessionManager::new(
                Arc::new(NullStorage),
                Arc::new(InMemoryStateStore::new()),
                ConnectionRegistry::new(),
            )),
            verifier: Arc::new(TokenVerifier::new("test-secret")),
            settings: Arc::new(SettingsStore::new()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    pub fn verifier(&self) -> Arc<TokenVerifier> {
        Arc::clone(&self.verifier)
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Periodically recovers any question deadline that has elapsed while
    /// no client traffic arrived to trigger it inline, and unloads session
    /// actors whose connection registry has sat empty past
    /// `hibernate_after_ms`. Runs for the life of the process.
    pub fn spawn_background_sweeps(&self) -> JoinHandle<()> {
        let context = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(1_000));
            loop {
                interval.tick().await;
                let hibernate_after_ms =
                    context.settings.get().map(|s| s.hibernate_after_ms).unwrap_or(60_000);
                for session_id in context.sessions.active_session_ids().await {
                    let Some(actor) = context.sessions.get(&session_id).await else { continue };
                    if let Err(err) = actor.recover_deadline_if_due().await {
                        tracing::warn!(session_id = %session_id, error = %err, "deadline recovery failed");
                    }
                    if context.sessions.registry().connection_count(&session_id) == 0
                        && actor.idle_for_ms() >= hibernate_after_ms
                    {
                        tracing::info!(session_id = %session_id, "hibernating idle session");
                        context.sessions.remove(&session_id).await;
                    }
                }
            }
        })
    }
}

struct NullStorage;

#[async_trait::async_trait]
impl StorageAdapter for NullStorage {
    async fn load_question(
        &self,
        question_id: &str,
    ) -> Result<crate::storage::QuestionContent, crate::storage::StorageError> {
        Err(crate::storage::StorageError::QuestionNotFound(question_id.to_string()))
    }
    async fn load_ruleset(
        &self,
        ruleset_id: &str,
    ) -> Result<classroom_engine::ruleset::Ruleset, crate::storage::StorageError> {
        Err(crate::storage::StorageError::RulesetNotFound(ruleset_id.to_string()))
    }
    async fn load_roster(
        &self,
        _session_id: &str,
    ) -> Result<classroom_engine::roster::Roster, crate::storage::StorageError> {
        Ok(classroom_engine::roster::Roster { teams: Vec::new(), students: Default::default() })
    }
    async fn insert_question_instance(
        &self,
        _instance: &classroom_engine::question::QuestionInstance,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn end_question_instance(
        &self,
        _instance_id: &str,
        _ended_at_ms: u64,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn insert_attempt(
        &self,
        _attempt: &classroom_engine::question::Attempt,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn insert_strength_event(
        &self,
        _session_id: &str,
        _event: &classroom_engine::question::StrengthEvent,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn update_session_on_end(
        &self,
        _session_id: &str,
        _final_position: f64,
        _ended_at_ms: u64,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn update_student_connection(
        &self,
        _student_id: &str,
        _status: classroom_engine::roster::ConnectionStatus,
        _last_seen_at_ms: u64,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
    async fn update_student_team(
        &self,
        _student_id: &str,
        _team_id: Option<&str>,
    ) -> Result<(), crate::storage::StorageError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub struct WebServer {
    context: AppContext,
}

impl WebServer {
    pub fn from_context(context: AppContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let WebServer { context } = self;
        let bind_addr = Self::bind_addr(context.config())?;

        let preflight = if bind_addr.port() != 0 {
            Some(std::net::TcpListener::bind(bind_addr).map_err(ServerError::BindError)?)
        } else {
            None
        };
        drop(preflight);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let routes = Self::with_metrics(Self::routes(&context), context.metrics());
        let routes = crate::middleware::with_request_logging(routes);
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
        };

        let (addr, server_future) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(bind_addr, shutdown_signal)
            .map_err(Self::map_warp_error)?;

        tracing::info!(%addr, "web server listening");

        let task = tokio::spawn(async move {
            server_future.await;
            Ok(())
        });

        Ok(ServerHandle::new(addr, shutdown_tx, task, context))
    }

    fn bind_addr(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
        let host = config.host();

        if let Ok(addr) = host.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, config.port()));
        }

        let candidate = format!("{}:{}", host, config.port());
        let mut addrs = candidate.to_socket_addrs().map_err(|err| {
            ServerError::ConfigError(format!("failed to resolve address `{candidate}`: {err}"))
        })?;
        addrs
            .next()
            .ok_or_else(|| ServerError::ConfigError(format!("failed to resolve address `{candidate}`")))
    }

    fn map_warp_error(err: warp::Error) -> ServerError {
        use std::error::Error as StdError;
        if let Some(source) = err.source() {
            if let Some(io_err) = source.downcast_ref::<std::io::Error>() {
                let recreated = std::io::Error::new(io_err.kind(), io_err.to_string());
                return ServerError::BindError(recreated);
            }
        }
        ServerError::ConfigError(err.to_string())
    }

    /// Wraps the composed routes with request-duration/success tracking
    /// through [`MetricsCollector`], mirroring the teacher's `RequestTimer`
    /// usage pattern without needing a timer at every individual handler.
    fn with_metrics(
        filter: BoxedFilter<(warp::reply::Response,)>,
        metrics: Arc<MetricsCollector>,
    ) -> BoxedFilter<(warp::reply::Response,)> {
        warp::any()
            .map(std::time::Instant::now)
            .and(filter)
            .map(move |start: std::time::Instant, response: warp::reply::Response| {
                let duration_ms = start.elapsed().as_millis() as u64;
                if response.status().is_success() {
                    metrics.record_request_success(duration_ms);
                } else {
                    metrics.record_request_failure(duration_ms);
                }
                response
            })
            .boxed()
    }

    fn routes(context: &AppContext) -> BoxedFilter<(warp::reply::Response,)> {
        Self::health_route()
            .or(Self::metrics_route(context))
            .unify()
            .or(Self::ws_route(context))
            .unify()
            .or(Self::control_routes(context))
            .unify()
            .or(Self::settings_routes(context))
            .unify()
            .boxed()
    }

    fn health_route() -> BoxedFilter<(warp::reply::Response,)> {
        warp::path("health")
            .and(warp::get())
            .and(warp::path::end())
            .map(|| handlers::health().into_response())
            .boxed()
    }

    fn metrics_route(context: &AppContext) -> BoxedFilter<(warp::reply::Response,)> {
        let metrics = context.metrics();
        warp::path("metrics")
            .and(warp::get())
            .and(warp::path::end())
            .and(Self::with(metrics))
            .map(|metrics: Arc<MetricsCollector>| handlers::metrics(metrics).into_response())
            .boxed()
    }

    fn ws_route(context: &AppContext) -> BoxedFilter<(warp::reply::Response,)> {
        let manager = context.sessions();
        let verifier = context.verifier();
        let settings = context.settings();

        warp::path!("api" / "v1" / "sessions" / String / "ws")
            .and(warp::ws())
            .and(Self::with(manager))
            .and(Self::with(verifier))
            .and(Self::with(settings))
            .map(
                |session_id: String,
                 ws: warp::ws::Ws,
                 manager: Arc<SessionManager>,
                 verifier: Arc<TokenVerifier>,
                 settings: Arc<SettingsStore>| {
                    ws.on_upgrade(move |socket| {
                        handlers::handle_connection(socket, session_id, manager, verifier, settings)
                    })
                    .into_response()
                },
            )
            .boxed()
    }

    fn control_routes(context: &AppContext) -> BoxedFilter<(warp::reply::Response,)> {
        let manager = context.sessions();

        let init = warp::path!("api" / "v1" / "sessions" / String)
            .and(warp::post())
            .and(Self::with(manager.clone()))
            .and(warp::body::json())
            .and_then(
                |session_id: String, manager: Arc<SessionManager>, request: handlers::InitSessionRequest| async move {
                    Ok::<_, Infallible>(handlers::init_session(manager, session_id, request).await)
                },
            );

        let end = warp::path!("api" / "v1" / "sessions" / String / "end")
            .and(warp::post())
            .and(Self::with(manager.clone()))
            .and_then(|session_id: String, manager: Arc<SessionManager>| async move {
                Ok::<_, Infallible>(handlers::end_session(manager, session_id).await)
            });

        let state = warp::path!("api" / "v1" / "sessions" / String / "state")
            .and(warp::get())
            .and(Self::with(manager.clone()))
            .and(warp::query::<handlers::StateQuery>())
            .and_then(
                |session_id: String, manager: Arc<SessionManager>, query: handlers::StateQuery| async move {
                    Ok::<_, Infallible>(handlers::get_state(manager, session_id, query).await)
                },
            );

        let answer = warp::path!("api" / "v1" / "sessions" / String / "answers")
            .and(warp::post())
            .and(Self::with(manager.clone()))
            .and(warp::body::json())
            .and_then(
                |session_id: String, manager: Arc<SessionManager>, request: handlers::SubmitAnswerHttpRequest| async move {
                    Ok::<_, Infallible>(handlers::submit_answer_http(manager, session_id, request).await)
                },
            );

        let kick = warp::path!("api" / "v1" / "sessions" / String / "players" / String / "kick")
            .and(warp::post())
            .and(Self::with(manager))
            .and(warp::body::json())
            .and_then(
                |session_id: String, student_id: String, manager: Arc<SessionManager>, request: handlers::KickRequest| async move {
                    Ok::<_, Infallible>(handlers::kick(manager, session_id, student_id, request).await)
                },
            );

        init.or(end).unify().or(state).unify().or(answer).unify().or(kick).unify().boxed()
    }

    fn settings_routes(context: &AppContext) -> BoxedFilter<(warp::reply::Response,)> {
        let settings = context.settings();

        let get = warp::path!("api" / "v1" / "settings")
            .and(warp::get())
            .and(Self::with(settings.clone()))
            .and_then(|settings: Arc<SettingsStore>| async move {
                Ok::<_, Infallible>(handlers::get_settings(settings).await)
            });

        let put = warp::path!("api" / "v1" / "settings")
            .and(warp::put())
            .and(Self::with(settings.clone()))
            .and(warp::body::json())
            .and_then(|settings: Arc<SettingsStore>, request: handlers::UpdateSettingsRequest| async move {
                Ok::<_, Infallible>(handlers::update_settings(settings, request).await)
            });

        let patch = warp::path!("api" / "v1" / "settings" / "field")
            .and(warp::patch())
            .and(Self::with(settings.clone()))
            .and(warp::body::json())
            .and_then(|settings: Arc<SettingsStore>, request: handlers::UpdateFieldRequest| async move {
                Ok::<_, Infallible>(handlers::update_field(settings, request).await)
            });

        let reset = warp::path!("api" / "v1" / "settings" / "reset")
            .and(warp::post())
            .and(Self::with(settings))
            .and_then(|settings: Arc<SettingsStore>| async move {
                Ok::<_, Infallible>(handlers::reset_settings(settings).await)
            });

        get.or(put).unify().or(patch).unify().or(reset).unify().boxed()
    }

    fn with<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
        warp::any().map(move || value.clone())
    }
}

pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ServerError>>>,
    context: AppContext,
}

impl ServerHandle {
    fn new(
        addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<Result<(), ServerError>>,
        context: AppContext,
    ) -> Self {
        Self { addr, shutdown: Some(shutdown), task: Some(task), context }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(result) => result?,
                Err(err) => {
                    return Err(ServerError::ConfigError(format!("server task join error: {err}")))
                }
            }
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_provides_shared_components() {
        let ctx = AppContext::new_for_tests();
        assert_eq!(ctx.config().port(), 0);
    }
}
