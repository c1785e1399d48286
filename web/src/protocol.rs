//! The WebSocket wire protocol: client-to-server commands and
//! server-to-client events, matching the shapes the REST layer and the
//! student/teacher clients are contractually bound to.

use classroom_engine::phase::Phase;
use classroom_engine::question::{QuestionStats, StrengthEventReason};
use classroom_engine::roster::{Student, Team};
use classroom_engine::snapshot::GameState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "HELLO")]
    Hello {
        token: String,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
        #[serde(default)]
        reconnect: bool,
        #[serde(rename = "lastEventId")]
        last_event_id: Option<u64>,
    },
    #[serde(rename = "JOIN_TEAM")]
    JoinTeam {
        #[serde(rename = "teamId")]
        team_id: String,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "SUBMIT_ANSWER")]
    SubmitAnswer {
        #[serde(rename = "instanceId")]
        instance_id: String,
        #[serde(rename = "choiceId")]
        choice_id: String,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_NEXT_QUESTION")]
    TeacherNextQuestion {
        #[serde(rename = "questionId")]
        question_id: Option<String>,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_PAUSE")]
    TeacherPause {
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_RESUME")]
    TeacherResume {
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_END_GAME")]
    TeacherEndGame {
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_MANUAL_ADJUST")]
    TeacherManualAdjust {
        delta: f64,
        reason: Option<String>,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "TEACHER_KICK_PLAYER")]
    TeacherKickPlayer {
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "PING")]
    Ping {
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "WELCOME")]
    Welcome {
        #[serde(rename = "sessionId")]
        session_id: String,
        phase: Phase,
        position: Option<f64>,
        teams: Option<Vec<Team>>,
        students: Option<Vec<Student>>,
        role: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "teamId")]
        team_id: Option<String>,
        #[serde(rename = "serverTime")]
        server_time: u64,
    },
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot {
        state: GameState,
        #[serde(rename = "snapshotVersion")]
        snapshot_version: u64,
    },
    #[serde(rename = "ROSTER_UPDATE")]
    RosterUpdate {
        teams: Vec<Team>,
        students: Option<Vec<Student>>,
        #[serde(rename = "totalPlayers")]
        total_players: Option<u32>,
    },
    #[serde(rename = "PLAYER_JOINED")]
    PlayerJoined {
        id: String,
        nickname: String,
        #[serde(rename = "teamId")]
        team_id: Option<String>,
    },
    #[serde(rename = "PLAYER_KICKED")]
    PlayerKicked {
        #[serde(rename = "studentId")]
        student_id: String,
        reason: Option<String>,
    },
    #[serde(rename = "QUESTION")]
    Question {
        question: QuestionPayload,
        #[serde(rename = "questionIndex")]
        question_index: u32,
        #[serde(rename = "totalQuestions")]
        total_questions: u32,
        #[serde(rename = "startsAt")]
        starts_at: u64,
        #[serde(rename = "timeLimitMs")]
        time_limit_ms: u64,
    },
    #[serde(rename = "PHASE_CHANGE")]
    PhaseChange {
        phase: Phase,
        #[serde(rename = "previousPhase")]
        previous_phase: Phase,
    },
    #[serde(rename = "TUG_UPDATE")]
    TugUpdate {
        position: f64,
        delta: f64,
        reason: StrengthEventReason,
        #[serde(rename = "teamId")]
        team_id: Option<String>,
        #[serde(rename = "lastEventId")]
        last_event_id: u64,
    },
    #[serde(rename = "ANSWER_RESULT")]
    AnswerResult {
        correct: bool,
        #[serde(rename = "correctAnswerId")]
        correct_answer_id: String,
        delta: f64,
        #[serde(rename = "newPosition")]
        new_position: f64,
        #[serde(rename = "pointsAwarded")]
        points_awarded: u32,
        #[serde(rename = "responseTimeMs")]
        response_time_ms: u64,
    },
    #[serde(rename = "QUESTION_REVEAL")]
    QuestionReveal {
        #[serde(rename = "questionInstanceId")]
        question_instance_id: String,
        #[serde(rename = "correctAnswerId")]
        correct_answer_id: String,
        explanation: Option<String>,
        stats: QuestionStats,
    },
    #[serde(rename = "GAME_END")]
    GameEnd {
        winner: Option<Team>,
        #[serde(rename = "finalPosition")]
        final_position: f64,
        summary: GameEndSummary,
    },
    #[serde(rename = "ERROR")]
    Error {
        code: &'static str,
        message: String,
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "ACK")]
    Ack {
        #[serde(rename = "clientMsgId")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "PONG")]
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionPayload {
    pub id: String,
    pub text: String,
    pub answers: Vec<AnswerPayload>,
    #[serde(rename = "timeLimitMs")]
    pub time_limit_ms: u64,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerPayload {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameEndSummary {
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(rename = "totalQuestions")]
    pub total_questions: u32,
}

/// Close codes the WebSocket handler uses when terminating a connection.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_message_parses_from_wire_shape() {
        let raw = r#"{"type":"HELLO","token":"abc","reconnect":true,"lastEventId":4}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        match parsed {
            ClientMessage::Hello { token, reconnect, last_event_id, .. } => {
                assert_eq!(token, "abc");
                assert!(reconnect);
                assert_eq!(last_event_id, Some(4));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn submit_answer_round_trips_field_names() {
        let raw = r#"{"type":"SUBMIT_ANSWER","instanceId":"qi1","choiceId":"b"}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, ClientMessage::SubmitAnswer { .. }));
    }

    #[test]
    fn error_message_serializes_stable_code() {
        let msg = ServerMessage::Error {
            code: "ALREADY_ANSWERED",
            message: "already answered".into(),
            client_msg_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "ALREADY_ANSWERED");
        assert_eq!(json["type"], "ERROR");
    }
}
