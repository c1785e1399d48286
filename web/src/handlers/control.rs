//! The Control API: the non-WebSocket surface the REST layer drives a
//! session through (init, end, state reads, HTTP-fallback answers, kicks).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};

use crate::errors::IntoErrorResponse;
use crate::session::SessionManager;

#[derive(Debug, Deserialize)]
pub struct InitSessionRequest {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "questionIds")]
    pub question_ids: Vec<String>,
    #[serde(rename = "rulesetId")]
    pub ruleset_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    #[serde(rename = "finalPosition")]
    pub final_position: f64,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerHttpRequest {
    #[serde(rename = "studentId")]
    pub student_id: String,
    /// Accepted for parity with the WebSocket contract's submitter identity,
    /// but team membership is always read from the roster rather than
    /// trusted from the request body.
    #[serde(rename = "teamId", default)]
    pub team_id: Option<String>,
    #[serde(rename = "questionInstanceId")]
    pub question_instance_id: String,
    #[serde(rename = "answerId")]
    pub answer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct KickRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    ok: bool,
}

pub async fn init_session(
    manager: Arc<SessionManager>,
    session_id: String,
    request: InitSessionRequest,
) -> Response {
    match manager
        .init_session(session_id, request.tenant_id, request.question_ids, request.ruleset_id)
        .await
    {
        Ok(_) => warp::reply::with_status(warp::reply::json(&AckResponse { ok: true }), StatusCode::OK)
            .into_response(),
        Err(err) => err.into_http_response(),
    }
}

pub async fn end_session(manager: Arc<SessionManager>, session_id: String) -> Response {
    let actor = match manager.get_or_rehydrate(&session_id).await {
        Ok(actor) => actor,
        Err(err) => return err.into_http_response(),
    };
    match actor.end_game().await {
        Ok(()) => {
            let final_position = actor.teacher_view().await.position;
            warp::reply::with_status(
                warp::reply::json(&EndSessionResponse { final_position }),
                StatusCode::OK,
            )
            .into_response()
        }
        Err(err) => err.into_http_response(),
    }
}

pub async fn get_state(manager: Arc<SessionManager>, session_id: String, query: StateQuery) -> Response {
    let actor = match manager.get_or_rehydrate(&session_id).await {
        Ok(actor) => actor,
        Err(err) => return err.into_http_response(),
    };
    let is_teacher = query.role.as_deref() == Some("teacher");
    let state = if is_teacher { actor.teacher_view().await } else { actor.student_view().await };
    let snapshot_version = actor.snapshot_version().await;
    warp::reply::json(&serde_json::json!({ "state": state, "snapshotVersion": snapshot_version }))
        .into_response()
}

pub async fn submit_answer_http(
    manager: Arc<SessionManager>,
    session_id: String,
    request: SubmitAnswerHttpRequest,
) -> Response {
    let actor = match manager.get_or_rehydrate(&session_id).await {
        Ok(actor) => actor,
        Err(err) => return err.into_http_response(),
    };
    match actor
        .admit_answer(&request.question_instance_id, &request.student_id, &request.answer_id)
        .await
    {
        Ok(()) => warp::reply::with_status(warp::reply::json(&AckResponse { ok: true }), StatusCode::OK)
            .into_response(),
        Err(err) => err.into_http_response(),
    }
}

pub async fn kick(
    manager: Arc<SessionManager>,
    session_id: String,
    student_id: String,
    request: KickRequest,
) -> Response {
    let actor = match manager.get_or_rehydrate(&session_id).await {
        Ok(actor) => actor,
        Err(err) => return err.into_http_response(),
    };
    match actor.kick_student(&student_id, request.reason).await {
        Ok(()) => warp::reply::with_status(warp::reply::json(&AckResponse { ok: true }), StatusCode::OK)
            .into_response(),
        Err(err) => err.into_http_response(),
    }
}
