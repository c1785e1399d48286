use thiserror::Error;

/// The stable wire code attached to an `ERROR` event, independent of the
/// human-readable message. Control-API callers map these to HTTP status
/// codes at the boundary; this crate only ever deals in the code itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidToken,
    SessionNotFound,
    SessionEnded,
    NotAuthorized,
    AlreadyAnswered,
    QuestionExpired,
    InvalidAnswer,
    RateLimited,
    InvalidMessage,
    Kicked,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionEnded => "SESSION_ENDED",
            ErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            ErrorCode::AlreadyAnswered => "ALREADY_ANSWERED",
            ErrorCode::QuestionExpired => "QUESTION_EXPIRED",
            ErrorCode::InvalidAnswer => "INVALID_ANSWER",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::Kicked => "KICKED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by pure session-engine operations.
///
/// Every variant maps onto exactly one [`ErrorCode`] via [`SessionError::code`],
/// which is what the hosting layer sends back to clients as an `ERROR` event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has already ended")]
    SessionEnded,
    #[error("command not valid while phase is {phase}")]
    InvalidPhase { phase: &'static str },
    #[error("team {team_id} has already answered instance {instance_id}")]
    AlreadyAnswered {
        team_id: String,
        instance_id: String,
    },
    #[error("question instance {instance_id} has expired")]
    QuestionExpired { instance_id: String },
    #[error("option index {index} is out of range for the active question")]
    InvalidAnswer { index: u32 },
    #[error("unknown team {0}")]
    UnknownTeam(String),
    #[error("unknown student {0}")]
    UnknownStudent(String),
    #[error("unknown question instance {0}")]
    UnknownQuestionInstance(String),
    #[error("roster is empty; at least one team is required to start")]
    EmptyRoster,
    #[error("no question instance is currently active")]
    NoActiveQuestion,
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::SessionEnded => ErrorCode::SessionEnded,
            SessionError::InvalidPhase { .. } => ErrorCode::NotAuthorized,
            SessionError::AlreadyAnswered { .. } => ErrorCode::AlreadyAnswered,
            SessionError::QuestionExpired { .. } => ErrorCode::QuestionExpired,
            SessionError::InvalidAnswer { .. } => ErrorCode::InvalidAnswer,
            SessionError::UnknownTeam(_)
            | SessionError::UnknownStudent(_)
            | SessionError::UnknownQuestionInstance(_) => ErrorCode::InvalidMessage,
            SessionError::EmptyRoster => ErrorCode::InvalidMessage,
            SessionError::NoActiveQuestion => ErrorCode::InvalidMessage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_answered_maps_to_stable_code() {
        let err = SessionError::AlreadyAnswered {
            team_id: "t1".into(),
            instance_id: "q1".into(),
        };
        assert_eq!(err.code().as_str(), "ALREADY_ANSWERED");
    }

    #[test]
    fn question_expired_maps_to_stable_code() {
        let err = SessionError::QuestionExpired {
            instance_id: "q1".into(),
        };
        assert_eq!(err.code(), ErrorCode::QuestionExpired);
    }
}
