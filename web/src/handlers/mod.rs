pub mod control;
pub mod health;
pub mod settings;
pub mod ws;

pub use control::{
    EndSessionResponse, InitSessionRequest, KickRequest, StateQuery, SubmitAnswerHttpRequest,
    end_session, get_state, init_session, kick, submit_answer_http,
};
pub use health::{health, metrics};
pub use settings::{
    UpdateFieldRequest, UpdateSettingsRequest, get_settings, reset_settings, update_field,
    update_settings,
};
pub use ws::handle_connection;
