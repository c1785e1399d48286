//! The session lifecycle state machine.
//!
//! `lobby → ready → active_question → reveal → … → completed`, with
//! `paused` as a side-branch of `active_question` that preserves the
//! remaining question time rather than discarding it.

use serde::{Deserialize, Serialize};

/// One of the six states a session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Ready,
    ActiveQuestion,
    Reveal,
    Paused,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Ready => "ready",
            Phase::ActiveQuestion => "active_question",
            Phase::Reveal => "reveal",
            Phase::Paused => "paused",
            Phase::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed)
    }

    /// Whether a question is currently being timed toward a deadline, i.e.
    /// whether the phase is `active_question` (as opposed to `paused`,
    /// where the same question exists but its clock is frozen).
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::ActiveQuestion)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command-level transitions a session can be pushed through. Each
/// variant corresponds to one external trigger named in the lifecycle
/// description; `QuestionTimerExpired` is synthetic and raised by the
/// hosting layer once the persisted deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Init,
    TeacherNextQuestion,
    TeacherPause,
    TeacherResume,
    TeacherEndGame,
    QuestionTimerExpired,
}

/// Attempts to apply `transition` to `from`, returning the resulting phase
/// or `None` if the transition is not legal from that phase. This function
/// only decides legality of the *phase* edge — callers are responsible for
/// any accompanying side conditions (e.g. "more questions remain") before
/// committing to a particular destination.
pub fn next_phase(from: Phase, transition: Transition, more_questions_remain: bool) -> Option<Phase> {
    use Phase::*;
    use Transition::*;
    match (from, transition) {
        (Lobby, Init) => Some(Ready),
        (Ready, TeacherNextQuestion) => Some(ActiveQuestion),
        (ActiveQuestion, QuestionTimerExpired) | (ActiveQuestion, TeacherNextQuestion) => {
            Some(Reveal)
        }
        (ActiveQuestion, TeacherPause) => Some(Paused),
        (Paused, TeacherResume) => Some(ActiveQuestion),
        (Reveal, TeacherNextQuestion) => {
            if more_questions_remain {
                Some(ActiveQuestion)
            } else {
                Some(Completed)
            }
        }
        (Reveal, TeacherEndGame) | (ActiveQuestion, TeacherEndGame) | (Paused, TeacherEndGame) => {
            Some(Completed)
        }
        _ => None,
    }
}
