//! The single-owner Session Engine host: one [`SessionActor`] per live
//! session, serializing every mutation behind its own mutex, plus the
//! process-wide [`SessionManager`] registry that creates, rehydrates, and
//! tears them down.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use warp::http::StatusCode;

use classroom_engine::errors::SessionError;
use classroom_engine::question::QuestionInstance;
use classroom_engine::roster::ConnectionStatus;
use classroom_engine::session_state::{Effect, SessionState};
use classroom_engine::snapshot;

use crate::errors::IntoErrorResponse;
use crate::events::{ConnectionRegistry, SessionId};
use crate::metrics::MetricsCollector;
use crate::protocol::{AnswerPayload, GameEndSummary, QuestionPayload, ServerMessage};
use crate::state_store::{StateStore, StateStoreError};
use crate::storage::{StorageAdapter, StorageError};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[derive(Debug, Error)]
pub enum SessionHostError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
}

impl IntoErrorResponse for SessionHostError {
    fn status_code(&self) -> StatusCode {
        match self {
            SessionHostError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionHostError::Session(err) => err.status_code(),
            SessionHostError::Storage(_) | SessionHostError::StateStore(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SessionHostError::NotFound(_) => "SESSION_NOT_FOUND",
            SessionHostError::Session(err) => err.error_code(),
            SessionHostError::Storage(_) | SessionHostError::StateStore(_) => "INTERNAL_ERROR",
        }
    }

    fn error_message(&self) -> String {
        self.to_string()
    }
}

/// One session's worth of authoritative state plus the collaborators it
/// talks to. Every public method takes the internal mutex, applies a pure
/// [`SessionState`] mutation, persists the result, and broadcasts the
/// effects — in that order, matching the "state persisted before the
/// controller returns" requirement for mutating commands.
pub struct SessionActor {
    session_id: SessionId,
    state: Mutex<SessionState>,
    storage: Arc<dyn StorageAdapter>,
    state_store: Arc<dyn StateStore>,
    registry: ConnectionRegistry,
    last_activity_ms: std::sync::atomic::AtomicU64,
}

impl SessionActor {
    pub fn new(
        session_id: SessionId,
        state: SessionState,
        storage: Arc<dyn StorageAdapter>,
        state_store: Arc<dyn StateStore>,
        registry: ConnectionRegistry,
    ) -> Self {
        SessionActor {
            session_id,
            state: Mutex::new(state),
            storage,
            state_store,
            registry,
            last_activity_ms: std::sync::atomic::AtomicU64::new(now_ms()),
        }
    }

    pub async fn teacher_view(&self) -> snapshot::GameState {
        snapshot::teacher_view(&*self.state.lock().await)
    }

    pub async fn student_view(&self) -> snapshot::GameState {
        snapshot::student_view(&*self.state.lock().await)
    }

    pub async fn snapshot_version(&self) -> u64 {
        self.state.lock().await.snapshot_version
    }

    /// Milliseconds since the last mutating command committed, used by the
    /// hibernation sweep to decide when an idle session can be unloaded.
    pub fn idle_for_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_activity_ms.load(std::sync::atomic::Ordering::Relaxed))
    }

    async fn commit(&self, effects: Vec<Effect>, state: &SessionState) -> Result<(), SessionHostError> {
        self.state_store.put(&self.session_id, state).await?;
        self.last_activity_ms.store(now_ms(), std::sync::atomic::Ordering::Relaxed);
        self.dispatch(effects, state).await;
        Ok(())
    }

    async fn dispatch(&self, effects: Vec<Effect>, state: &SessionState) {
        for effect in effects {
            match effect {
                Effect::PhaseChanged { phase, previous_phase } => {
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::PhaseChange { phase, previous_phase },
                    );
                }
                Effect::QuestionStarted { instance, question_index, total_questions } => {
                    if let Err(err) = self.storage.insert_question_instance(&instance).await {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to persist question instance");
                    }
                    let payload = QuestionPayload {
                        id: instance.id.clone(),
                        text: instance.text.clone(),
                        answers: instance
                            .answers
                            .iter()
                            .map(|a| AnswerPayload { id: a.id.clone(), text: a.text.clone() })
                            .collect(),
                        time_limit_ms: instance.time_limit_ms,
                        points: instance.base_points,
                    };
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::Question {
                            question: payload,
                            question_index,
                            total_questions,
                            starts_at: instance.started_at_ms,
                            time_limit_ms: instance.time_limit_ms,
                        },
                    );
                }
                Effect::TugUpdate { position, delta, reason, team_id, last_event_id, event } => {
                    if let Err(err) = self.storage.insert_strength_event(&self.session_id, &event).await {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to persist strength event");
                    }
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::TugUpdate { position, delta, reason, team_id, last_event_id },
                    );
                }
                Effect::AnswerResult {
                    student_id,
                    instance_id: _,
                    correct,
                    correct_answer_id,
                    delta,
                    new_position,
                    points_awarded,
                    response_time_ms,
                    attempt,
                } => {
                    if let Err(err) = self.storage.insert_attempt(&attempt).await {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to persist attempt");
                    }
                    self.registry.send_to_student(
                        &self.session_id,
                        &student_id,
                        ServerMessage::AnswerResult {
                            correct,
                            correct_answer_id,
                            delta,
                            new_position,
                            points_awarded,
                            response_time_ms,
                        },
                    );
                }
                Effect::QuestionReveal { question_instance_id, correct_answer_id, stats } => {
                    if let Err(err) = self
                        .storage
                        .end_question_instance(&question_instance_id, now_ms())
                        .await
                    {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to close question instance");
                    }
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::QuestionReveal {
                            question_instance_id,
                            correct_answer_id,
                            explanation: None,
                            stats,
                        },
                    );
                }
                Effect::GameEnd { winner_team_id, final_position, total_questions, duration_ms } => {
                    if let Err(err) = self
                        .storage
                        .update_session_on_end(&self.session_id, final_position, now_ms())
                        .await
                    {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to finalize session");
                    }
                    let winner = winner_team_id.and_then(|id| state.roster.team(&id).cloned());
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::GameEnd {
                            winner,
                            final_position,
                            summary: GameEndSummary { duration_ms, total_questions },
                        },
                    );
                }
                Effect::RosterUpdate => {
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::RosterUpdate {
                            teams: state.roster.teams.clone(),
                            students: Some(state.roster.students.values().cloned().collect()),
                            total_players: Some(state.roster.students.len() as u32),
                        },
                    );
                }
                Effect::PlayerJoined { student_id, nickname, team_id } => {
                    if let Err(err) = self
                        .storage
                        .update_student_team(&student_id, team_id.as_deref())
                        .await
                    {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to persist team membership");
                    }
                    self.registry.broadcast(
                        &self.session_id,
                        ServerMessage::PlayerJoined { id: student_id, nickname, team_id },
                    );
                }
                Effect::PlayerKicked { student_id, reason } => {
                    if let Err(err) = self
                        .storage
                        .update_student_connection(&student_id, ConnectionStatus::Kicked, now_ms())
                        .await
                    {
                        tracing::error!(session_id = %self.session_id, error = %err, "failed to persist kick");
                    }
                    self.registry.send_to_student(
                        &self.session_id,
                        &student_id,
                        ServerMessage::PlayerKicked { student_id: student_id.clone(), reason },
                    );
                    self.registry.close_connection_for_student(&self.session_id, &student_id);
                }
            }
        }
    }

    pub async fn join_team(&self, student_id: &str, team_id: &str) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.join_team(student_id, team_id)?;
        self.commit(effects, &state).await
    }

    /// Records a student's connection status (connected on HELLO, or
    /// disconnected on socket drop). A no-op, with no broadcast, if the
    /// status is already current.
    pub async fn mark_student_connection(
        &self,
        student_id: &str,
        status: ConnectionStatus,
    ) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.mark_student_connection(student_id, status)?;
        if !effects.is_empty() {
            if let Err(err) = self
                .storage
                .update_student_connection(student_id, status, now_ms())
                .await
            {
                tracing::error!(session_id = %self.session_id, error = %err, "failed to persist connection status");
            }
        }
        self.commit(effects, &state).await
    }

    /// Loads the next question's content from storage and installs it as
    /// the active question instance.
    pub async fn start_question(&self, question_id: &str) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let content = self.storage.load_question(question_id).await?;
        let index = (state.current_question_index + 1).max(0) as u32;
        let now = now_ms();
        let instance = QuestionInstance {
            id: Uuid::new_v4().to_string(),
            question_id: content.id,
            index,
            text: content.text,
            answers: content.answers,
            correct_answer_id: content.correct_answer_id,
            time_limit_ms: if state.ruleset.time_limit_ms > 0 {
                state.ruleset.time_limit_ms
            } else {
                content.time_limit_ms
            },
            base_points: if state.ruleset.points_per_correct > 0 {
                state.ruleset.points_per_correct
            } else {
                content.base_points
            },
            started_at_ms: now,
            ended_at_ms: None,
        };
        let effects = state.start_question(instance)?;
        self.commit(effects, &state).await
    }

    pub async fn admit_answer(
        &self,
        instance_id: &str,
        student_id: &str,
        answer_id: &str,
    ) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.admit_answer(instance_id, student_id, answer_id, now_ms())?;
        self.commit(effects, &state).await
    }

    pub async fn pause(&self) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.pause(now_ms())?;
        self.commit(effects, &state).await
    }

    pub async fn resume(&self) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.resume(now_ms())?;
        self.commit(effects, &state).await
    }

    pub async fn manual_adjust(&self, delta: f64, trigger_id: &str) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.manual_adjust(delta, trigger_id, now_ms())?;
        self.commit(effects, &state).await
    }

    pub async fn kick_student(&self, student_id: &str, reason: Option<String>) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.kick_student(student_id, reason)?;
        self.commit(effects, &state).await
    }

    pub async fn end_game(&self) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.end_game(now_ms())?;
        self.commit(effects, &state).await
    }

    /// Ends the active question on timer expiration and rests in `reveal`.
    /// Unlike `advance_or_end`, this never starts the next question or ends
    /// the game on its own — §4.3 keeps `reveal → active_question` gated on
    /// a subsequent `teacher_next_question`.
    async fn end_question_only(&self) -> Result<(), SessionHostError> {
        let mut state = self.state.lock().await;
        let effects = state.end_question(now_ms())?;
        self.commit(effects, &state).await
    }

    /// `teacher_next_question`: ends the active question if there is one,
    /// then either starts the next question or ends the game, mirroring
    /// the Question Lifecycle Controller's "advance or end" rule.
    pub async fn advance_or_end(&self) -> Result<(), SessionHostError> {
        self.end_question_only().await?;
        let (has_more, next_question_id) = {
            let state = self.state.lock().await;
            (state.has_more_questions(), state.next_question_id().map(str::to_string))
        };
        if has_more {
            if let Some(question_id) = next_question_id {
                self.start_question(&question_id).await
            } else {
                self.end_game().await
            }
        } else {
            self.end_game().await
        }
    }

    /// Recomputes the question deadline against the current wall clock and
    /// fires end-question immediately if it has already passed — the
    /// crash-safety recovery §5 requires on rehydration. Lands in `reveal`
    /// and stops there; advancing to the next question or ending the game
    /// is a separate `teacher_next_question` action, never implied by a
    /// timer alone.
    pub async fn recover_deadline_if_due(&self) -> Result<(), SessionHostError> {
        let due = {
            let state = self.state.lock().await;
            state.phase() == classroom_engine::phase::Phase::ActiveQuestion
                && state
                    .current_question
                    .as_ref()
                    .map(|q| q.accepts_at(now_ms()) == false)
                    .unwrap_or(false)
        };
        if due {
            self.end_question_only().await
        } else {
            Ok(())
        }
    }
}

/// Process-wide registry of live [`SessionActor`]s, keyed by session id.
/// At most one actor exists per session id at any time; all mutations for
/// that session funnel through it.
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn StorageAdapter>,
    state_store: Arc<dyn StateStore>,
    registry: ConnectionRegistry,
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SessionActor>>>>,
    metrics: OnceLock<Arc<MetricsCollector>>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        state_store: Arc<dyn StateStore>,
        registry: ConnectionRegistry,
    ) -> Self {
        SessionManager {
            storage,
            state_store,
            registry,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            metrics: OnceLock::new(),
        }
    }

    /// Wires a metrics sink so the active-session gauge tracks actors this
    /// manager creates and tears down. A no-op if already attached; managers
    /// built directly by tests simply never call this.
    pub fn attach_metrics(&self, metrics: Arc<MetricsCollector>) {
        let _ = self.metrics.set(metrics);
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// `init(session_id, tenant_id, question_id_sequence, ruleset_id?)`.
    pub async fn init_session(
        &self,
        session_id: SessionId,
        tenant_id: String,
        question_ids: Vec<String>,
        ruleset_id: Option<String>,
    ) -> Result<Arc<SessionActor>, SessionHostError> {
        let roster = self.storage.load_roster(&session_id).await?;
        let ruleset = match ruleset_id {
            Some(id) => Some(self.storage.load_ruleset(&id).await?),
            None => None,
        };
        let mut state = SessionState::new(session_id.clone(), ruleset.clone().unwrap_or_default());
        let effects = state.init(tenant_id, question_ids, ruleset, roster, now_ms())?;

        let actor = Arc::new(SessionActor::new(
            session_id.clone(),
            state.clone(),
            self.storage.clone(),
            self.state_store.clone(),
            self.registry.clone(),
        ));
        actor.commit(effects, &state).await?;
        self.sessions.write().await.insert(session_id, actor.clone());
        if let Some(metrics) = self.metrics.get() {
            metrics.increment_active_sessions();
        }
        Ok(actor)
    }

    /// Returns the live actor for `session_id`, rehydrating it from the
    /// State Store if this host has no in-memory instance yet (e.g. after
    /// hibernation or a fresh process start).
    pub async fn get_or_rehydrate(&self, session_id: &str) -> Result<Arc<SessionActor>, SessionHostError> {
        if let Some(actor) = self.sessions.read().await.get(session_id) {
            return Ok(actor.clone());
        }
        let state = self
            .state_store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionHostError::NotFound(session_id.to_string()))?;
        let actor = Arc::new(SessionActor::new(
            session_id.to_string(),
            state,
            self.storage.clone(),
            self.state_store.clone(),
            self.registry.clone(),
        ));
        actor.recover_deadline_if_due().await?;
        self.sessions.write().await.insert(session_id.to_string(), actor.clone());
        if let Some(metrics) = self.metrics.get() {
            metrics.increment_active_sessions();
        }
        Ok(actor)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionActor>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            if let Some(metrics) = self.metrics.get() {
                metrics.decrement_active_sessions();
            }
        }
        self.registry.drop_session(&session_id.to_string());
        let _ = self.state_store.delete(session_id).await;
    }

    pub async fn active_session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
