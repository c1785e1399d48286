use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use classroom_engine::question::{AnswerOption, Attempt, QuestionInstance, StrengthEvent};
use classroom_engine::roster::{ConnectionStatus, Roster, Side, Streak, Student, Team};
use classroom_engine::ruleset::Ruleset;
use classroom_web::{
    AppContext, InMemoryStateStore, QuestionContent, ServerConfig, StorageAdapter, StorageError,
    WebServer,
};
use serde_json::json;
use warp::hyper::{self, Body, Client as HyperClient, Request};

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

fn roster_with_one_student() -> Roster {
    let mut students = HashMap::new();
    students.insert(
        "alice".to_string(),
        Student {
            id: "alice".into(),
            nickname: "alice".into(),
            team_id: Some("L".into()),
            status: ConnectionStatus::Connected,
        },
    );
    Roster {
        teams: vec![
            Team { id: "L".into(), display_name: "Left".into(), color: "#f00".into(), side: Side::Left, score: 0, streak: Streak::default() },
            Team { id: "R".into(), display_name: "Right".into(), color: "#00f".into(), side: Side::Right, score: 0, streak: Streak::default() },
        ],
        students,
    }
}

async fn server_with_roster(roster: Roster) -> WebServer {
    let storage: Arc<dyn StorageAdapter> = Arc::new(FakeStorage { roster });
    let context = AppContext::new(
        ServerConfig::for_tests(),
        storage,
        Arc::new(InMemoryStateStore::new()),
        "test-secret",
    );
    WebServer::from_context(context)
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let server = server_with_roster(roster_with_one_student()).await;
    let handle = server.start().await.expect("start server");
    let address = handle.address();
    let client = HyperClient::new();

    let init_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1")
        .parse()
        .expect("parse init uri");
    let init_request = Request::builder()
        .method(hyper::Method::POST)
        .uri(init_uri)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "tenantId": "tenant1", "questionIds": ["q1", "q2"], "rulesetId": null }).to_string(),
        ))
        .expect("build init request");
    let init_response = client.request(init_request).await.expect("issue init request");
    assert_eq!(init_response.status(), hyper::StatusCode::OK);

    let teacher_state_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1/state?role=teacher")
        .parse()
        .expect("parse state uri");
    let teacher_state_response = client
        .get(teacher_state_uri)
        .await
        .expect("request teacher state");
    assert_eq!(teacher_state_response.status(), hyper::StatusCode::OK);
    let teacher_body = hyper::body::to_bytes(teacher_state_response.into_body())
        .await
        .expect("read teacher state body");
    let teacher_json: serde_json::Value =
        serde_json::from_slice(&teacher_body).expect("parse teacher state json");
    assert!(teacher_json["snapshotVersion"].is_u64());
    assert_eq!(teacher_json["state"]["position"], 50.0);

    let student_state_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1/state")
        .parse()
        .expect("parse state uri");
    let student_state_response = client
        .get(student_state_uri)
        .await
        .expect("request student state");
    assert_eq!(student_state_response.status(), hyper::StatusCode::OK);

    let kick_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1/players/ghost/kick")
        .parse()
        .expect("parse kick uri");
    let kick_request = Request::builder()
        .method(hyper::Method::POST)
        .uri(kick_uri)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "reason": "left class" }).to_string()))
        .expect("build kick request");
    let kick_response = client.request(kick_request).await.expect("issue kick request");
    assert_eq!(
        kick_response.status(),
        hyper::StatusCode::BAD_REQUEST,
        "kicking a student who never joined reports an unknown-student error"
    );

    let end_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1/end")
        .parse()
        .expect("parse end uri");
    let end_request = Request::builder()
        .method(hyper::Method::POST)
        .uri(end_uri)
        .body(Body::empty())
        .expect("build end request");
    let end_response = client.request(end_request).await.expect("issue end request");
    assert_eq!(end_response.status(), hyper::StatusCode::OK);
    let end_body = hyper::body::to_bytes(end_response.into_body())
        .await
        .expect("read end body");
    let end_json: serde_json::Value = serde_json::from_slice(&end_body).expect("parse end json");
    assert_eq!(end_json["finalPosition"], 50.0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn init_with_empty_roster_is_rejected() {
    let server = server_with_roster(Roster { teams: Vec::new(), students: HashMap::new() }).await;
    let handle = server.start().await.expect("start server");
    let address = handle.address();
    let client = HyperClient::new();

    let init_uri: hyper::Uri = format!("http://{address}/api/v1/sessions/sess1")
        .parse()
        .expect("parse init uri");
    let init_request = Request::builder()
        .method(hyper::Method::POST)
        .uri(init_uri)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "tenantId": "tenant1", "questionIds": ["q1"] }).to_string()))
        .expect("build init request");
    let init_response = client.request(init_request).await.expect("issue init request");
    assert_eq!(init_response.status(), hyper::StatusCode::BAD_REQUEST);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn state_for_unknown_session_is_not_found() {
    let server = server_with_roster(roster_with_one_student()).await;
    let handle = server.start().await.expect("start server");
    let address = handle.address();
    let client = HyperClient::new();

    let uri: hyper::Uri = format!("http://{address}/api/v1/sessions/nobody/state")
        .parse()
        .expect("parse uri");
    let response = client.get(uri).await.expect("request state");
    assert_eq!(response.status(), hyper::StatusCode::NOT_FOUND);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let server = server_with_roster(roster_with_one_student()).await;
    let handle = server.start().await.expect("start server");
    let address = handle.address();
    let client = HyperClient::new();

    let uri: hyper::Uri = format!("http://{address}/health").parse().expect("parse uri");
    let response = client.get(uri).await.expect("request health");
    assert_eq!(response.status(), hyper::StatusCode::OK);

    handle.shutdown().await.expect("shutdown");
}
