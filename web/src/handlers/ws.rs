//! The Message Router: owns one live WebSocket connection end to end —
//! the `HELLO` handshake, per-connection rate limiting, message
//! validation and dispatch, and graceful close.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use warp::ws::{Message, WebSocket};

use classroom_engine::phase::Phase;
use classroom_engine::roster::ConnectionStatus;

use crate::auth::{Role as AuthRole, TokenVerifier};
use crate::errors::IntoErrorResponse;
use crate::events::{ConnectionRateLimiter, ConnectionRole};
use crate::protocol::{close_code, ClientMessage, ServerMessage};
use crate::session::{now_ms, SessionManager};
use crate::settings::SettingsStore;

pub async fn handle_connection(
    ws: WebSocket,
    session_id: String,
    manager: Arc<SessionManager>,
    verifier: Arc<TokenVerifier>,
    settings: Arc<SettingsStore>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let grace_period = settings.get().map(|s| s.hello_grace_period_ms).unwrap_or(5_000);

    let hello = match tokio::time::timeout(Duration::from_millis(grace_period), ws_rx.next()).await
    {
        Ok(Some(Ok(message))) => message,
        _ => {
            let _ = close_with(&mut ws_tx, close_code::POLICY_VIOLATION, "no HELLO received").await;
            return;
        }
    };

    let client_msg = match hello.to_str().ok().and_then(|text| serde_json::from_str::<ClientMessage>(text).ok()) {
        Some(ClientMessage::Hello { token, client_msg_id: _, reconnect: _, last_event_id: _ }) => token,
        _ => {
            let _ = close_with(&mut ws_tx, close_code::POLICY_VIOLATION, "first message must be HELLO").await;
            return;
        }
    };

    let claims = match verifier.verify(&client_msg, &session_id) {
        Ok(claims) => claims,
        Err(_) => {
            let _ = send_error(&mut ws_tx, "INVALID_TOKEN", "invalid or expired token", None).await;
            let _ = close_with(&mut ws_tx, close_code::POLICY_VIOLATION, "invalid token").await;
            return;
        }
    };

    let actor = match manager.get_or_rehydrate(&session_id).await {
        Ok(actor) => actor,
        Err(_) => {
            let _ = send_error(&mut ws_tx, "SESSION_NOT_FOUND", "session not found", None).await;
            let _ = close_with(&mut ws_tx, close_code::POLICY_VIOLATION, "session not found").await;
            return;
        }
    };

    if actor.teacher_view().await.phase == Phase::Completed {
        let _ = send_error(&mut ws_tx, "SESSION_ENDED", "this session has ended", None).await;
        let _ = close_with(&mut ws_tx, close_code::NORMAL, "session ended").await;
        return;
    }

    let role = match claims.role {
        AuthRole::Teacher => ConnectionRole::Teacher,
        AuthRole::Student => ConnectionRole::Student,
    };
    let student_id = matches!(claims.role, AuthRole::Student).then(|| claims.sub.clone());

    if let Some(student_id) = student_id.as_deref() {
        let already_kicked = actor
            .teacher_view()
            .await
            .students
            .iter()
            .any(|s| s.id == student_id && s.status == ConnectionStatus::Kicked);
        if already_kicked {
            let _ = send_error(&mut ws_tx, "KICKED", "you have been removed from this session", None).await;
            let _ = close_with(&mut ws_tx, close_code::POLICY_VIOLATION, "kicked").await;
            return;
        }
    }

    let mut handle = manager.registry().register(session_id.clone(), role, student_id.clone());

    if let Some(student_id) = student_id.as_deref() {
        if let Err(err) = actor.mark_student_connection(student_id, ConnectionStatus::Connected).await {
            tracing::warn!(session_id = %session_id, student_id, error = %err, "failed to record student connection");
        }
    }

    let view = if role == ConnectionRole::Teacher { actor.teacher_view().await } else { actor.student_view().await };
    let welcome = ServerMessage::Welcome {
        session_id: session_id.clone(),
        phase: view.phase,
        position: Some(view.position),
        teams: Some(view.teams.clone()),
        students: Some(view.students.clone()),
        role: match role {
            ConnectionRole::Teacher => "teacher".to_string(),
            ConnectionRole::Student => "student".to_string(),
        },
        user_id: claims.sub.clone(),
        team_id: claims.team_id.clone(),
        server_time: now_ms(),
    };
    if send(&mut ws_tx, welcome).await.is_err() {
        return;
    }
    let snapshot_version = actor.snapshot_version().await;
    let snapshot = ServerMessage::StateSnapshot { state: view, snapshot_version };
    if send(&mut ws_tx, snapshot).await.is_err() {
        return;
    }

    let rate_limiter = ConnectionRateLimiter::new(
        settings.get().map(|s| s.ws_rate_limit_per_second).unwrap_or(10),
    );

    loop {
        tokio::select! {
            outbound = handle.receiver.recv() => {
                match outbound {
                    Some(message) => {
                        let is_terminal = matches!(
                            message,
                            ServerMessage::GameEnd { .. } | ServerMessage::PlayerKicked { .. }
                        );
                        let close_after = if is_terminal {
                            Some(match &message {
                                ServerMessage::PlayerKicked { .. } => close_code::POLICY_VIOLATION,
                                _ => close_code::NORMAL,
                            })
                        } else {
                            None
                        };
                        if send(&mut ws_tx, message).await.is_err() {
                            break;
                        }
                        if let Some(code) = close_after {
                            let reason = if code == close_code::NORMAL { "game ended" } else { "kicked" };
                            let _ = close_with(&mut ws_tx, code, reason).await;
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        if message.is_close() {
                            break;
                        }
                        if !message.is_text() {
                            continue;
                        }
                        if !rate_limiter.check() {
                            let _ = send_error(&mut ws_tx, "RATE_LIMITED", "too many messages", None).await;
                            continue;
                        }
                        let Some(text) = message.to_str().ok() else { continue };
                        dispatch_client_message(
                            text,
                            &actor,
                            &manager,
                            &session_id,
                            role,
                            &claims.sub,
                            &mut ws_tx,
                        )
                        .await;
                    }
                    _ => break,
                }
            }
        }
    }

    drop(handle);

    if let Some(student_id) = student_id.as_deref() {
        if let Err(err) = actor.mark_student_connection(student_id, ConnectionStatus::Disconnected).await {
            tracing::warn!(session_id = %session_id, student_id, error = %err, "failed to record student disconnection");
        }
    }
}

async fn dispatch_client_message(
    text: &str,
    actor: &Arc<crate::session::SessionActor>,
    manager: &Arc<SessionManager>,
    session_id: &str,
    role: ConnectionRole,
    user_id: &str,
    ws_tx: &mut (impl futures::Sink<Message> + Unpin),
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let Ok(client_message) = parsed else {
        let _ = send_error(ws_tx, "INVALID_MESSAGE", "could not parse message", None).await;
        return;
    };

    let client_msg_id = client_msg_id_of(&client_message);
    let is_teacher = role == ConnectionRole::Teacher;

    let result = match client_message {
        ClientMessage::Hello { .. } => {
            let _ = send_error(ws_tx, "INVALID_MESSAGE", "HELLO already handled", client_msg_id.clone()).await;
            return;
        }
        ClientMessage::JoinTeam { team_id, .. } => {
            if is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "student role required", client_msg_id).await;
                return;
            }
            actor.join_team(user_id, &team_id).await
        }
        ClientMessage::SubmitAnswer { instance_id, choice_id, .. } => {
            if is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "student role required", client_msg_id).await;
                return;
            }
            actor.admit_answer(&instance_id, user_id, &choice_id).await
        }
        ClientMessage::TeacherNextQuestion { .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            actor.advance_or_end().await
        }
        ClientMessage::TeacherPause { .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            actor.pause().await
        }
        ClientMessage::TeacherResume { .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            actor.resume().await
        }
        ClientMessage::TeacherEndGame { .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            actor.end_game().await
        }
        ClientMessage::TeacherManualAdjust { delta, .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            actor.manual_adjust(delta, user_id).await
        }
        ClientMessage::TeacherKickPlayer { player_id, .. } => {
            if !is_teacher {
                let _ = send_error(ws_tx, "NOT_AUTHORIZED", "teacher role required", client_msg_id).await;
                return;
            }
            let outcome = actor.kick_student(&player_id, None).await;
            if outcome.is_ok() {
                manager.registry().close_connection_for_student(&session_id.to_string(), &player_id);
            }
            outcome
        }
        ClientMessage::Ping { .. } => {
            let _ = send(ws_tx, ServerMessage::Pong).await;
            return;
        }
    };

    match result {
        Ok(()) => {
            let _ = send(ws_tx, ServerMessage::Ack { client_msg_id }).await;
        }
        Err(err) => {
            let _ = send_error(ws_tx, err.error_code(), &err.to_string(), client_msg_id).await;
        }
    }
}

fn client_msg_id_of(message: &ClientMessage) -> Option<String> {
    match message {
        ClientMessage::Hello { client_msg_id, .. }
        | ClientMessage::JoinTeam { client_msg_id, .. }
        | ClientMessage::SubmitAnswer { client_msg_id, .. }
        | ClientMessage::TeacherNextQuestion { client_msg_id, .. }
        | ClientMessage::TeacherPause { client_msg_id }
        | ClientMessage::TeacherResume { client_msg_id }
        | ClientMessage::TeacherEndGame { client_msg_id }
        | ClientMessage::TeacherManualAdjust { client_msg_id, .. }
        | ClientMessage::TeacherKickPlayer { client_msg_id, .. }
        | ClientMessage::Ping { client_msg_id } => client_msg_id.clone(),
    }
}

async fn send(ws_tx: &mut (impl futures::Sink<Message> + Unpin), message: ServerMessage) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(&message) else { return Err(()) };
    ws_tx.send(Message::text(json)).await.map_err(|_| ())
}

async fn send_error(
    ws_tx: &mut (impl futures::Sink<Message> + Unpin),
    code: &'static str,
    message: &str,
    client_msg_id: Option<String>,
) -> Result<(), ()> {
    send(ws_tx, ServerMessage::Error { code, message: message.to_string(), client_msg_id }).await
}

async fn close_with(ws_tx: &mut (impl futures::Sink<Message> + Unpin), code: u16, reason: &str) -> Result<(), ()> {
    ws_tx
        .send(Message::close_with(code, reason.to_string()))
        .await
        .map_err(|_| ())
}
