//! Operator-facing settings endpoints over the runtime-mutable
//! [`SettingsStore`], so tunables like the per-connection rate limit can be
//! retuned without a redeploy.

use std::sync::Arc;
use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};

use crate::settings::{AppSettings, SettingsError, SettingsStore};

fn settings_error_response(err: SettingsError) -> Response {
    let status = match err {
        SettingsError::InvalidValue(_) => StatusCode::BAD_REQUEST,
        SettingsError::StoragePoisoned => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(warp::reply::json(&serde_json::json!({ "error": err.to_string() })), status)
        .into_response()
}

pub async fn get_settings(store: Arc<SettingsStore>) -> Response {
    match store.get() {
        Ok(settings) => warp::reply::json(&settings).into_response(),
        Err(err) => settings_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(rename = "wsRateLimitPerSecond")]
    pub ws_rate_limit_per_second: u32,
    #[serde(rename = "helloGracePeriodMs")]
    pub hello_grace_period_ms: u64,
    #[serde(rename = "hibernateAfterMs")]
    pub hibernate_after_ms: u64,
}

pub async fn update_settings(store: Arc<SettingsStore>, request: UpdateSettingsRequest) -> Response {
    let settings = AppSettings {
        ws_rate_limit_per_second: request.ws_rate_limit_per_second,
        hello_grace_period_ms: request.hello_grace_period_ms,
        hibernate_after_ms: request.hibernate_after_ms,
    };
    match store.update(settings) {
        Ok(updated) => warp::reply::json(&updated).into_response(),
        Err(err) => settings_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateFieldRequest {
    field: String,
    value: u64,
}

pub async fn update_field(store: Arc<SettingsStore>, request: UpdateFieldRequest) -> Response {
    let current = match store.get() {
        Ok(settings) => settings,
        Err(err) => return settings_error_response(err),
    };
    let updated = match request.field.as_str() {
        "ws_rate_limit_per_second" => AppSettings { ws_rate_limit_per_second: request.value as u32, ..current },
        "hello_grace_period_ms" => AppSettings { hello_grace_period_ms: request.value, ..current },
        "hibernate_after_ms" => AppSettings { hibernate_after_ms: request.value, ..current },
        other => {
            return warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "error": format!("unknown settings field: {other}") })),
                StatusCode::BAD_REQUEST,
            )
            .into_response()
        }
    };
    match store.update(updated) {
        Ok(updated) => warp::reply::json(&updated).into_response(),
        Err(err) => settings_error_response(err),
    }
}

pub async fn reset_settings(store: Arc<SettingsStore>) -> Response {
    match store.update(AppSettings::default()) {
        Ok(updated) => warp::reply::json(&updated).into_response(),
        Err(err) => settings_error_response(err),
    }
}
