//! The aggregate root: Session Runtime State plus every pure mutation the
//! Session Engine performs against it.
//!
//! Every public method here takes whatever external timestamp or content
//! it needs as an argument and returns either an error or the list of
//! [`Effect`]s the hosting layer should turn into persisted records and
//! broadcast events. No method reads the clock, touches a socket, or
//! talks to storage — that is the hosting layer's job.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::SessionError;
use crate::phase::{next_phase, Phase, Transition};
use crate::question::{aggregate_stats, Attempt, QuestionInstance, QuestionStats, StrengthEvent, StrengthEventReason};
use crate::roster::{ConnectionStatus, Roster};
use crate::rope::{apply_delta, favored_side, winning_side, START_POSITION};
use crate::ruleset::Ruleset;
use crate::scoring::{compute_delta, compute_points};

/// A fact the engine wants the hosting layer to act on: persist a record,
/// broadcast an event, or both. Named after the wire events they back, but
/// deliberately untagged with connection/role concerns — that filtering
/// happens in the Broadcaster (outside this crate).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    PhaseChanged {
        phase: Phase,
        previous_phase: Phase,
    },
    QuestionStarted {
        instance: QuestionInstance,
        question_index: u32,
        total_questions: u32,
    },
    TugUpdate {
        position: f64,
        delta: f64,
        reason: StrengthEventReason,
        team_id: Option<String>,
        last_event_id: u64,
        event: StrengthEvent,
    },
    AnswerResult {
        student_id: String,
        instance_id: String,
        correct: bool,
        correct_answer_id: String,
        delta: f64,
        new_position: f64,
        points_awarded: u32,
        response_time_ms: u64,
        attempt: Attempt,
    },
    QuestionReveal {
        question_instance_id: String,
        correct_answer_id: String,
        stats: QuestionStats,
    },
    GameEnd {
        winner_team_id: Option<String>,
        final_position: f64,
        total_questions: u32,
        duration_ms: u64,
    },
    RosterUpdate,
    PlayerJoined {
        student_id: String,
        nickname: String,
        team_id: Option<String>,
    },
    PlayerKicked {
        student_id: String,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub tenant_id: String,
    pub phase: Phase,
    pub position: f64,
    pub ruleset: Ruleset,
    pub roster: Roster,
    pub question_ids: Vec<String>,
    /// `-1` before the first question has started, matching the phase
    /// machine's "current index = -1" precondition for the initial
    /// `ready → active_question` edge.
    pub current_question_index: i64,
    pub current_question: Option<QuestionInstance>,
    /// Attempts recorded against the current question instance only,
    /// cleared when the next question starts. This is the "in-memory
    /// attempts map" the reveal-time aggregate stats are computed from.
    pub attempts_this_question: HashMap<String, Attempt>,
    pub paused_at_ms: Option<u64>,
    pub last_event_id: u64,
    pub snapshot_version: u64,
    pub started_at_ms: Option<u64>,
}

impl SessionState {
    pub fn new(session_id: String, ruleset: Ruleset) -> Self {
        SessionState {
            session_id,
            tenant_id: String::new(),
            phase: Phase::Lobby,
            position: START_POSITION,
            ruleset,
            roster: Roster::default(),
            question_ids: Vec::new(),
            current_question_index: -1,
            current_question: None,
            attempts_this_question: HashMap::new(),
            paused_at_ms: None,
            last_event_id: 0,
            snapshot_version: 0,
            started_at_ms: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_more_questions(&self) -> bool {
        (self.current_question_index + 1) < self.question_ids.len() as i64
    }

    pub fn next_question_id(&self) -> Option<&str> {
        let next_index = self.current_question_index + 1;
        self.question_ids.get(next_index as usize).map(String::as_str)
    }

    fn bump_version(&mut self) {
        self.snapshot_version += 1;
    }

    fn next_event_id(&mut self) -> u64 {
        self.last_event_id += 1;
        self.last_event_id
    }

    /// `lobby → ready`. Loads the roster and question sequence chosen by
    /// the REST layer, and the ruleset if one was supplied (otherwise the
    /// default ruleset already in place is kept).
    pub fn init(
        &mut self,
        tenant_id: String,
        question_ids: Vec<String>,
        ruleset: Option<Ruleset>,
        roster: Roster,
        now_ms: u64,
    ) -> Result<Vec<Effect>, SessionError> {
        if roster.teams.is_empty() {
            return Err(SessionError::EmptyRoster);
        }
        let previous_phase = self.phase;
        let new_phase = next_phase(self.phase, Transition::Init, false)
            .ok_or(SessionError::InvalidPhase { phase: self.phase.as_str() })?;
        self.tenant_id = tenant_id;
        self.question_ids = question_ids;
        if let Some(ruleset) = ruleset {
            self.ruleset = ruleset;
        }
        self.roster = roster;
        self.started_at_ms = Some(now_ms);
        self.phase = new_phase;
        self.bump_version();
        Ok(vec![Effect::PhaseChanged { phase: new_phase, previous_phase }])
    }

    pub fn join_team(&mut self, student_id: &str, team_id: &str) -> Result<Vec<Effect>, SessionError> {
        self.roster.require_team(team_id)?;
        let student = self
            .roster
            .students
            .get_mut(student_id)
            .ok_or_else(|| SessionError::UnknownStudent(student_id.to_string()))?;
        student.team_id = Some(team_id.to_string());
        let nickname = student.nickname.clone();
        self.bump_version();
        Ok(vec![
            Effect::PlayerJoined {
                student_id: student_id.to_string(),
                nickname,
                team_id: Some(team_id.to_string()),
            },
            Effect::RosterUpdate,
        ])
    }

    /// `ready|reveal → active_question`. `instance` is built by the
    /// hosting layer from content it loaded through the Storage Adapter;
    /// this method only validates the phase edge and installs it.
    pub fn start_question(
        &mut self,
        instance: QuestionInstance,
    ) -> Result<Vec<Effect>, SessionError> {
        let previous_phase = self.phase;
        let new_phase = next_phase(self.phase, Transition::TeacherNextQuestion, true)
            .filter(|p| *p == Phase::ActiveQuestion)
            .ok_or(SessionError::InvalidPhase { phase: self.phase.as_str() })?;

        self.attempts_this_question.clear();
        self.current_question_index = instance.index as i64;
        let total_questions = self.question_ids.len() as u32;
        let question_index = self.current_question_index as u32;
        self.current_question = Some(instance.clone());
        self.phase = new_phase;
        self.bump_version();

        Ok(vec![
            Effect::PhaseChanged { phase: new_phase, previous_phase },
            Effect::QuestionStarted { instance, question_index, total_questions },
        ])
    }

    /// Admits one student's answer to the active question. Idempotent per
    /// (instance, student): a second submission for the same pair is
    /// rejected with [`SessionError::AlreadyAnswered`] rather than
    /// double-scoring.
    pub fn admit_answer(
        &mut self,
        instance_id: &str,
        student_id: &str,
        answer_id: &str,
        now_ms: u64,
    ) -> Result<Vec<Effect>, SessionError> {
        if self.phase != Phase::ActiveQuestion {
            return Err(SessionError::InvalidPhase { phase: self.phase.as_str() });
        }
        self.roster.require_student(student_id)?;

        let instance = self
            .current_question
            .as_ref()
            .filter(|q| q.id == instance_id)
            .ok_or_else(|| SessionError::UnknownQuestionInstance(instance_id.to_string()))?;

        if !instance.accepts_at(now_ms) {
            return Err(SessionError::QuestionExpired { instance_id: instance_id.to_string() });
        }
        if self.attempts_this_question.contains_key(student_id) {
            return Err(SessionError::AlreadyAnswered {
                team_id: self
                    .roster
                    .students
                    .get(student_id)
                    .and_then(|s| s.team_id.clone())
                    .unwrap_or_default(),
                instance_id: instance_id.to_string(),
            });
        }
        if instance.option(answer_id).is_none() {
            return Err(SessionError::InvalidAnswer { index: 0 });
        }

        let is_correct = instance.correct_answer_id == answer_id;
        let response_time_ms = now_ms.saturating_sub(instance.started_at_ms);
        let correct_answer_id = instance.correct_answer_id.clone();
        let base_points = instance.base_points;
        let time_limit_ms = instance.time_limit_ms;

        let points_awarded = if is_correct {
            compute_points(&self.ruleset, base_points, response_time_ms, time_limit_ms)
        } else {
            0
        };

        let attempt = Attempt {
            question_instance_id: instance_id.to_string(),
            student_id: student_id.to_string(),
            answer_id: answer_id.to_string(),
            is_correct,
            response_time_ms,
            points_awarded,
            timestamp_ms: now_ms,
        };
        self.attempts_this_question
            .insert(student_id.to_string(), attempt.clone());

        let mut effects = Vec::new();
        let mut delta = 0.0;
        let mut new_position = self.position;

        let team_id = self.roster.students.get(student_id).and_then(|s| s.team_id.clone());
        if is_correct {
            if let Some(team_id) = team_id.as_ref() {
                if let Some(team) = self.roster.team(team_id).cloned() {
                    if let Some(team_mut) = self.roster.team_mut(team_id) {
                        team_mut.score += points_awarded as i64;
                    }
                    let new_streak = self.roster.advance_streak(team_id);
                    delta = compute_delta(&self.ruleset, team.side, points_awarded, new_streak);
                    let (clamped_position, effective_delta) = apply_delta(self.position, delta);
                    delta = effective_delta;
                    new_position = clamped_position;
                    self.position = clamped_position;

                    // The streak multiplier only scales `delta` (§4.5); the wire
                    // reason for an answer-driven tug update is always
                    // `correct_answer` (§4.4).
                    let reason = StrengthEventReason::CorrectAnswer;
                    let last_event_id = self.next_event_id();
                    let event = StrengthEvent {
                        team_id: Some(team_id.clone()),
                        delta,
                        reason,
                        new_position,
                        trigger_id: student_id.to_string(),
                        timestamp_ms: now_ms,
                    };
                    effects.push(Effect::TugUpdate {
                        position: new_position,
                        delta,
                        reason,
                        team_id: Some(team_id.clone()),
                        last_event_id,
                        event,
                    });
                }
            }
        }

        self.bump_version();
        effects.push(Effect::AnswerResult {
            student_id: student_id.to_string(),
            instance_id: instance_id.to_string(),
            correct: is_correct,
            correct_answer_id,
            delta,
            new_position,
            points_awarded,
            response_time_ms,
            attempt,
        });
        Ok(effects)
    }

    /// Ends the active question: freezes its `ended_at`, computes
    /// aggregate stats from this question's attempts, and transitions to
    /// `reveal`. Idempotent — calling this again on an already-ended
    /// question or with no active question is a no-op.
    pub fn end_question(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        let already_ended = match self.current_question.as_ref() {
            None => return Ok(Vec::new()),
            Some(instance) => instance.ended_at_ms.is_some(),
        };
        if already_ended {
            return Ok(Vec::new());
        }
        if self.phase != Phase::ActiveQuestion {
            return Err(SessionError::InvalidPhase { phase: self.phase.as_str() });
        }

        let roster = self.roster.clone();
        let instance = self.current_question.as_mut().expect("checked above");
        instance.ended_at_ms = Some(now_ms);
        let question_instance_id = instance.id.clone();
        let correct_answer_id = instance.correct_answer_id.clone();

        let attempts: Vec<Attempt> = self.attempts_this_question.values().cloned().collect();
        let stats = aggregate_stats(&attempts, |student_id| {
            roster.students.get(student_id).and_then(|s| s.team_id.clone())
        });

        let previous_phase = self.phase;
        self.phase = Phase::Reveal;
        self.bump_version();

        Ok(vec![
            Effect::PhaseChanged { phase: Phase::Reveal, previous_phase },
            Effect::QuestionReveal { question_instance_id, correct_answer_id, stats },
        ])
    }

    /// `active_question → paused`; the question's clock is frozen by
    /// recording the moment of the pause. [`SessionState::resume`] later
    /// shifts `started_at_ms` forward by exactly the paused duration so
    /// the original deadline's remaining time is preserved.
    pub fn pause(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        let previous_phase = self.phase;
        let new_phase = next_phase(self.phase, Transition::TeacherPause, false)
            .ok_or(SessionError::InvalidPhase { phase: self.phase.as_str() })?;
        self.paused_at_ms = Some(now_ms);
        self.phase = new_phase;
        self.bump_version();
        Ok(vec![Effect::PhaseChanged { phase: new_phase, previous_phase }])
    }

    pub fn resume(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        let previous_phase = self.phase;
        let new_phase = next_phase(self.phase, Transition::TeacherResume, false)
            .ok_or(SessionError::InvalidPhase { phase: self.phase.as_str() })?;
        if let Some(paused_at) = self.paused_at_ms.take() {
            let elapsed_paused = now_ms.saturating_sub(paused_at);
            if let Some(instance) = self.current_question.as_mut() {
                instance.started_at_ms += elapsed_paused;
            }
        }
        self.phase = new_phase;
        self.bump_version();
        Ok(vec![Effect::PhaseChanged { phase: new_phase, previous_phase }])
    }

    /// Bypasses scoring entirely: `delta` is clamped to `[-100, 100]`
    /// (the legal input range for a manual adjustment) and applied
    /// straight to the rope, clamped again at the rope's own bounds.
    pub fn manual_adjust(
        &mut self,
        delta: f64,
        trigger_id: &str,
        now_ms: u64,
    ) -> Result<Vec<Effect>, SessionError> {
        let delta = delta.clamp(-100.0, 100.0);
        let (new_position, effective_delta) = apply_delta(self.position, delta);
        self.position = new_position;

        let team_id = favored_side(effective_delta).and_then(|side| {
            self.roster.team_by_side(side).map(|team| team.id.clone())
        });
        let last_event_id = self.next_event_id();
        let event = StrengthEvent {
            team_id: team_id.clone(),
            delta: effective_delta,
            reason: StrengthEventReason::ManualAdjust,
            new_position,
            trigger_id: trigger_id.to_string(),
            timestamp_ms: now_ms,
        };
        self.bump_version();
        Ok(vec![Effect::TugUpdate {
            position: new_position,
            delta: effective_delta,
            reason: StrengthEventReason::ManualAdjust,
            team_id,
            last_event_id,
            event,
        }])
    }

    /// Updates a student's connection status (e.g. on HELLO handshake or
    /// socket drop). A no-op if the status is unchanged; otherwise bumps
    /// the version and broadcasts a roster update so every connection sees
    /// the current connected/disconnected set.
    pub fn mark_student_connection(
        &mut self,
        student_id: &str,
        status: ConnectionStatus,
    ) -> Result<Vec<Effect>, SessionError> {
        let student = self
            .roster
            .students
            .get_mut(student_id)
            .ok_or_else(|| SessionError::UnknownStudent(student_id.to_string()))?;
        if student.status == status || student.status == ConnectionStatus::Kicked {
            return Ok(Vec::new());
        }
        student.status = status;
        self.bump_version();
        Ok(vec![Effect::RosterUpdate])
    }

    pub fn kick_student(
        &mut self,
        student_id: &str,
        reason: Option<String>,
    ) -> Result<Vec<Effect>, SessionError> {
        let student = self
            .roster
            .students
            .get_mut(student_id)
            .ok_or_else(|| SessionError::UnknownStudent(student_id.to_string()))?;
        student.status = ConnectionStatus::Kicked;
        student.team_id = None;
        self.bump_version();
        Ok(vec![
            Effect::PlayerKicked { student_id: student_id.to_string(), reason },
            Effect::RosterUpdate,
        ])
    }

    /// Ends the game from any live phase: closes the active question (if
    /// any) without a reveal, transitions to `completed`, and reports the
    /// winning side — the team whose side the rope reached, or `None` if
    /// it is still centered.
    pub fn end_game(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        let previous_phase = self.phase;
        let new_phase = next_phase(self.phase, Transition::TeacherEndGame, false)
            .ok_or(SessionError::InvalidPhase { phase: self.phase.as_str() })?;

        if let Some(instance) = self.current_question.as_mut() {
            if instance.ended_at_ms.is_none() {
                instance.ended_at_ms = Some(now_ms);
            }
        }

        let winner_team_id = winning_side(self.position)
            .and_then(|side| self.roster.team_by_side(side))
            .map(|team| team.id.clone());
        let duration_ms = self
            .started_at_ms
            .map(|started| now_ms.saturating_sub(started))
            .unwrap_or(0);
        let total_questions = self.question_ids.len() as u32;

        self.phase = new_phase;
        self.bump_version();

        Ok(vec![
            Effect::PhaseChanged { phase: new_phase, previous_phase },
            Effect::GameEnd {
                winner_team_id,
                final_position: self.position,
                total_questions,
                duration_ms,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::AnswerOption;
    use crate::roster::{Side, Streak, Student, Team};

    fn roster_with_two_teams() -> Roster {
        let mut students = HashMap::new();
        students.insert(
            "s1".to_string(),
            Student {
                id: "s1".into(),
                nickname: "alice".into(),
                team_id: Some("L".into()),
                status: ConnectionStatus::Connected,
            },
        );
        students.insert(
            "s2".to_string(),
            Student {
                id: "s2".into(),
                nickname: "bob".into(),
                team_id: Some("R".into()),
                status: ConnectionStatus::Connected,
            },
        );
        Roster {
            teams: vec![
                Team {
                    id: "L".into(),
                    display_name: "Left".into(),
                    color: "#f00".into(),
                    side: Side::Left,
                    score: 0,
                    streak: Streak::default(),
                },
                Team {
                    id: "R".into(),
                    display_name: "Right".into(),
                    color: "#00f".into(),
                    side: Side::Right,
                    score: 0,
                    streak: Streak::default(),
                },
            ],
            students,
        }
    }

    fn instance(id: &str, index: u32, started_at_ms: u64) -> QuestionInstance {
        QuestionInstance {
            id: id.into(),
            question_id: format!("q{index}"),
            index,
            text: "2 + 2?".into(),
            answers: vec![
                AnswerOption { id: "a".into(), text: "3".into() },
                AnswerOption { id: "b".into(), text: "4".into() },
            ],
            correct_answer_id: "b".into(),
            time_limit_ms: 30_000,
            base_points: 10,
            started_at_ms,
            ended_at_ms: None,
        }
    }

    fn ready_state() -> SessionState {
        let mut state = SessionState::new("sess1".into(), Ruleset::default());
        state
            .init("tenant1".into(), vec!["q1".into(), "q2".into()], None, roster_with_two_teams(), 0)
            .unwrap();
        state
    }

    #[test]
    fn scenario_1_single_correct_answer_fast() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 0)).unwrap();

        let effects = state.admit_answer("qi1", "s1", "b", 3_000).unwrap();
        assert_eq!(state.position, 48.6);
        assert_eq!(state.roster.team("L").unwrap().score, 14);
        let tug = effects
            .iter()
            .find_map(|e| match e {
                Effect::TugUpdate { position, delta, team_id, .. } => {
                    Some((*position, *delta, team_id.clone()))
                }
                _ => None,
            })
            .expect("tug update present");
        assert_eq!(tug, (48.6, -1.4, Some("L".into())));
    }

    #[test]
    fn scenario_3_incorrect_answer_has_no_tug() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 0)).unwrap();
        let effects = state.admit_answer("qi1", "s1", "a", 1_000).unwrap();
        assert!(!effects.iter().any(|e| matches!(e, Effect::TugUpdate { .. })));
        assert_eq!(state.position, 50.0);
    }

    #[test]
    fn scenario_4_double_submit_is_rejected() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 0)).unwrap();
        state.admit_answer("qi1", "s1", "b", 1_000).unwrap();
        let err = state.admit_answer("qi1", "s1", "b", 1_500).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyAnswered { .. }));
    }

    #[test]
    fn scenario_5_timer_expiry_with_no_answers_reveals_zero_stats() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 0)).unwrap();
        let effects = state.end_question(30_000).unwrap();
        let reveal = effects
            .iter()
            .find_map(|e| match e {
                Effect::QuestionReveal { stats, .. } => Some(stats.clone()),
                _ => None,
            })
            .expect("reveal present");
        assert_eq!(reveal.total_attempts, 0);
        assert_eq!(reveal.correct_attempts, 0);
        assert_eq!(state.phase, Phase::Reveal);
    }

    #[test]
    fn scenario_6_manual_adjust_reports_effective_delta() {
        let mut state = ready_state();
        state.position = 95.0;
        let effects = state.manual_adjust(20.0, "teacher1", 0).unwrap();
        assert_eq!(state.position, 100.0);
        let (delta, _) = effects
            .iter()
            .find_map(|e| match e {
                Effect::TugUpdate { delta, team_id, .. } => Some((*delta, team_id.clone())),
                _ => None,
            })
            .expect("tug update present");
        assert_eq!(delta, 5.0);
    }

    #[test]
    fn pause_then_resume_preserves_remaining_time() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 1_000)).unwrap();
        state.pause(5_000).unwrap();
        state.resume(10_000).unwrap();
        let instance = state.current_question.as_ref().unwrap();
        assert_eq!(instance.started_at_ms, 6_000);
        assert_eq!(instance.deadline_ms(), 36_000);
    }

    #[test]
    fn rejects_answer_past_expired_deadline() {
        let mut state = ready_state();
        state.start_question(instance("qi1", 0, 0)).unwrap();
        let err = state.admit_answer("qi1", "s1", "b", 30_001).unwrap_err();
        assert!(matches!(err, SessionError::QuestionExpired { .. }));
    }

    #[test]
    fn init_requires_nonempty_roster() {
        let mut state = SessionState::new("sess1".into(), Ruleset::default());
        let err = state
            .init("tenant1".into(), vec!["q1".into()], None, Roster::default(), 0)
            .unwrap_err();
        assert_eq!(err, SessionError::EmptyRoster);
    }

    #[test]
    fn end_game_reports_winner_by_final_rope_side() {
        let mut state = ready_state();
        state.position = 30.0;
        let effects = state.end_game(5_000).unwrap();
        let winner = effects
            .iter()
            .find_map(|e| match e {
                Effect::GameEnd { winner_team_id, .. } => Some(winner_team_id.clone()),
                _ => None,
            })
            .expect("game end present");
        assert_eq!(winner, Some("L".into()));
        assert_eq!(state.phase, Phase::Completed);
    }

    #[test]
    fn mark_student_connection_is_a_noop_when_status_is_unchanged() {
        let mut state = ready_state();
        let effects = state
            .mark_student_connection("s1", ConnectionStatus::Connected)
            .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn mark_student_connection_broadcasts_roster_update_on_change() {
        let mut state = ready_state();
        let effects = state
            .mark_student_connection("s1", ConnectionStatus::Disconnected)
            .unwrap();
        assert!(matches!(effects.as_slice(), [Effect::RosterUpdate]));
        assert_eq!(
            state.roster.students.get("s1").unwrap().status,
            ConnectionStatus::Disconnected
        );
    }

    #[test]
    fn mark_student_connection_cannot_resurrect_a_kicked_student() {
        let mut state = ready_state();
        state.kick_student("s1", None).unwrap();
        let effects = state
            .mark_student_connection("s1", ConnectionStatus::Connected)
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(
            state.roster.students.get("s1").unwrap().status,
            ConnectionStatus::Kicked
        );
    }
}
