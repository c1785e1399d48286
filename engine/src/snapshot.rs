//! Role-discriminated read projections over [`SessionState`].
//!
//! The engine itself never decides who is allowed to see what over the
//! wire — that is the Broadcaster's job — but it does own the two shapes a
//! state snapshot can take, so that "never leak the correct answer to a
//! student" is enforced once, here, rather than at every call site that
//! builds an outgoing message.

use serde::Serialize;

use crate::phase::Phase;
use crate::question::AnswerOption;
use crate::roster::{Student, Team};
use crate::session_state::SessionState;

#[derive(Debug, Clone, Serialize)]
pub struct CurrentQuestionView {
    pub id: String,
    pub text: String,
    pub answers: Vec<AnswerOption>,
    pub time_limit_ms: u64,
    pub points: u32,
    pub started_at_ms: u64,
    /// Present only in the teacher projection, or in the student
    /// projection once the phase has reached `reveal`.
    pub correct_answer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameState {
    pub session_id: String,
    pub phase: Phase,
    pub position: f64,
    pub teams: Vec<Team>,
    pub students: Vec<Student>,
    pub current_question_index: i64,
    pub total_questions: u32,
    pub current_question: Option<CurrentQuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state: GameState,
    pub snapshot_version: u64,
}

fn build_view(state: &SessionState, include_answer: bool) -> GameState {
    GameState {
        session_id: state.session_id.clone(),
        phase: state.phase,
        position: state.position,
        teams: state.roster.teams.clone(),
        students: state.roster.students.values().cloned().collect(),
        current_question_index: state.current_question_index,
        total_questions: state.question_ids.len() as u32,
        current_question: state.current_question.as_ref().map(|instance| CurrentQuestionView {
            id: instance.id.clone(),
            text: instance.text.clone(),
            answers: instance.answers.clone(),
            time_limit_ms: instance.time_limit_ms,
            points: instance.base_points,
            started_at_ms: instance.started_at_ms,
            correct_answer_id: if include_answer {
                Some(instance.correct_answer_id.clone())
            } else {
                None
            },
        }),
    }
}

/// The full projection, for teacher connections and Control API callers
/// with the `teacher` role.
pub fn teacher_view(state: &SessionState) -> GameState {
    build_view(state, true)
}

/// The student-safe projection: the active question never carries
/// `correct_answer_id` until the phase reaches `reveal`.
pub fn student_view(state: &SessionState) -> GameState {
    build_view(state, state.phase == Phase::Reveal)
}

pub fn snapshot_for_role(state: &SessionState, is_teacher: bool) -> StateSnapshot {
    let gs = if is_teacher { teacher_view(state) } else { student_view(state) };
    StateSnapshot { state: gs, snapshot_version: state.snapshot_version }
}
