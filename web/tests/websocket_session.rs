use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use classroom_engine::question::{AnswerOption, Attempt, QuestionInstance, StrengthEvent};
use classroom_engine::roster::{ConnectionStatus, Roster, Side, Streak, Student, Team};
use classroom_engine::ruleset::Ruleset;
use classroom_web::auth::{Claims, Role};
use classroom_web::{
    AppContext, InMemoryStateStore, QuestionContent, ServerConfig, StorageAdapter, StorageError,
    WebServer,
};
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

const JWT_SECRET: &str = "test-secret";

struct FakeStorage {
    roster: Roster,
}

#[async_trait]
impl StorageAdapter for FakeStorage {
    async fn load_question(&self, question_id: &str) -> Result<QuestionContent, StorageError> {
        Err(StorageError::QuestionNotFound(question_id.to_string()))
    }
    async fn load_ruleset(&self, ruleset_id: &str) -> Result<Ruleset, StorageError> {
        Err(StorageError::RulesetNotFound(ruleset_id.to_string()))
    }
    async fn load_roster(&self, _session_id: &str) -> Result<Roster, StorageError> {
        Ok(self.roster.clone())
    }
    async fn insert_question_instance(&self, _instance: &QuestionInstance) -> Result<(), StorageError> {
        Ok(())
    }
    async fn end_question_instance(&self, _instance_id: &str, _ended_at_ms: u64) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_attempt(&self, _attempt: &Attempt) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_strength_event(&self, _session_id: &str, _event: &StrengthEvent) -> Result<(), StorageError> {
        Ok(())
    }
    async fn update_session_on_end(&self, _session_id: &str, _final_position: f64, _ended_at_ms: u64) -> Result<(), StorageError> {
        Ok(())
    }
    async fn update_student_connection(&self, _student_id: &str, _status: ConnectionStatus, _last_seen_at_ms: u64) -> Result<(), StorageError> {
        Ok(())
    }
    async fn update_student_team(&self, _student_id: &str, _team_id: Option<&str>) -> Result<(), StorageError> {
        Ok(())
    }
}

fn token_for(sub: &str, role: Role, session_id: &str, team_id: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role,
        tenant_id: "tenant1".to_string(),
        session_id: session_id.to_string(),
        team_id: team_id.map(str::to_string),
        exp: 9_999_999_999,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

fn roster_with_one_student() -> Roster {
    let mut students = HashMap::new();
    students.insert(
        "alice".to_string(),
        Student { id: "alice".into(), nickname: "alice".into(), team_id: Some("L".into()), status: ConnectionStatus::Connected },
    );
    Roster {
        teams: vec![
            Team { id: "L".into(), display_name: "Left".into(), color: "#f00".into(), side: Side::Left, score: 0, streak: Streak::default() },
            Team { id: "R".into(), display_name: "Right".into(), color: "#00f".into(), side: Side::Right, score: 0, streak: Streak::default() },
        ],
        students,
    }
}

#[tokio::test]
async fn teacher_hello_handshake_receives_welcome_and_snapshot() {
    let storage: Arc<dyn StorageAdapter> = Arc::new(FakeStorage { roster: roster_with_one_student() });
    let context = AppContext::new(
        ServerConfig::for_tests(),
        storage,
        Arc::new(InMemoryStateStore::new()),
        JWT_SECRET,
    );

    context
        .sessions()
        .init_session("sess1".to_string(), "tenant1".to_string(), vec!["q1".to_string()], None)
        .await
        .expect("init session");

    let server = WebServer::from_context(context);
    let handle = server.start().await.expect("start server");
    let address = handle.address();

    let url = format!("ws://{address}/api/v1/sessions/sess1/ws");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.expect("connect websocket");

    let token = token_for("teacher-1", Role::Teacher, "sess1", None);
    let hello = json!({ "type": "HELLO", "token": token, "reconnect": false }).to_string();
    socket.send(Message::Text(hello.into())).await.expect("send HELLO");

    let welcome = socket.next().await.expect("welcome frame").expect("welcome ok");
    let welcome_json: serde_json::Value = serde_json::from_str(welcome.to_text().unwrap()).expect("parse welcome");
    assert_eq!(welcome_json["type"], "WELCOME");
    assert_eq!(welcome_json["role"], "teacher");
    assert_eq!(welcome_json["sessionId"], "sess1");

    let snapshot = socket.next().await.expect("snapshot frame").expect("snapshot ok");
    let snapshot_json: serde_json::Value = serde_json::from_str(snapshot.to_text().unwrap()).expect("parse snapshot");
    assert_eq!(snapshot_json["type"], "STATE_SNAPSHOT");
    assert_eq!(snapshot_json["state"]["position"], 50.0);

    socket.close(None).await.ok();
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn teacher_cannot_join_a_team() {
    let storage: Arc<dyn StorageAdapter> = Arc::new(FakeStorage { roster: roster_with_one_student() });
    let context = AppContext::new(
        ServerConfig::for_tests(),
        storage,
        Arc::new(InMemoryStateStore::new()),
        JWT_SECRET,
    );

    context
        .sessions()
        .init_session("sess3".to_string(), "tenant1".to_string(), vec!["q1".to_string()], None)
        .await
        .expect("init session");

    let server = WebServer::from_context(context);
    let handle = server.start().await.expect("start server");
    let address = handle.address();

    let url = format!("ws://{address}/api/v1/sessions/sess3/ws");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.expect("connect websocket");

    let token = token_for("teacher-1", Role::Teacher, "sess3", None);
    let hello = json!({ "type": "HELLO", "token": token, "reconnect": false }).to_string();
    socket.send(Message::Text(hello.into())).await.expect("send HELLO");
    socket.next().await.expect("welcome frame").expect("welcome ok");
    socket.next().await.expect("snapshot frame").expect("snapshot ok");

    let join = json!({ "type": "JOIN_TEAM", "teamId": "L" }).to_string();
    socket.send(Message::Text(join.into())).await.expect("send JOIN_TEAM");

    let response = socket.next().await.expect("error frame").expect("error ok");
    let response_json: serde_json::Value =
        serde_json::from_str(response.to_text().unwrap()).expect("parse error");
    assert_eq!(response_json["type"], "ERROR");
    assert_eq!(response_json["code"], "NOT_AUTHORIZED");

    socket.close(None).await.ok();
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn connection_without_hello_is_closed() {
    let storage: Arc<dyn StorageAdapter> = Arc::new(FakeStorage { roster: roster_with_one_student() });
    let context = AppContext::new(
        ServerConfig::for_tests(),
        storage,
        Arc::new(InMemoryStateStore::new()),
        JWT_SECRET,
    );
    context
        .sessions()
        .init_session("sess2".to_string(), "tenant1".to_string(), vec!["q1".to_string()], None)
        .await
        .expect("init session");

    let server = WebServer::from_context(context);
    let handle = server.start().await.expect("start server");
    let address = handle.address();

    let url = format!("ws://{address}/api/v1/sessions/sess2/ws");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.expect("connect websocket");

    socket.send(Message::Text("not HELLO".into())).await.expect("send garbage");
    let next = socket.next().await;
    match next {
        Some(Ok(Message::Close(_))) | None => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
        Some(Err(_)) => {}
    }

    handle.shutdown().await.expect("shutdown");
}
