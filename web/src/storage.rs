//! The relational Storage Adapter: the single choke-point through which
//! the session-hosting layer reads question/ruleset content and appends
//! question instances, attempts, and strength events.

use async_trait::async_trait;
use classroom_engine::question::{Attempt, QuestionInstance, StrengthEvent};
use classroom_engine::roster::{ConnectionStatus, Roster, Side, Streak, Student, Team};
use classroom_engine::ruleset::Ruleset;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("question {0} not found")]
    QuestionNotFound(String),
    #[error("ruleset {0} not found")]
    RulesetNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A question bank row, loaded at `start_question` time and used to build
/// a fresh [`QuestionInstance`].
#[derive(Debug, Clone)]
pub struct QuestionContent {
    pub id: String,
    pub text: String,
    pub answers: Vec<classroom_engine::question::AnswerOption>,
    pub correct_answer_id: String,
    pub time_limit_ms: u64,
    pub base_points: u32,
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn load_question(&self, question_id: &str) -> Result<QuestionContent, StorageError>;
    async fn load_ruleset(&self, ruleset_id: &str) -> Result<Ruleset, StorageError>;
    async fn load_roster(&self, session_id: &str) -> Result<Roster, StorageError>;
    async fn insert_question_instance(&self, instance: &QuestionInstance) -> Result<(), StorageError>;
    async fn end_question_instance(&self, instance_id: &str, ended_at_ms: u64) -> Result<(), StorageError>;
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<(), StorageError>;
    async fn insert_strength_event(&self, session_id: &str, event: &StrengthEvent) -> Result<(), StorageError>;
    async fn update_session_on_end(&self, session_id: &str, final_position: f64, ended_at_ms: u64) -> Result<(), StorageError>;
    async fn update_student_connection(&self, student_id: &str, status: ConnectionStatus, last_seen_at_ms: u64) -> Result<(), StorageError>;
    async fn update_student_team(&self, student_id: &str, team_id: Option<&str>) -> Result<(), StorageError>;
}

/// The production adapter, backed by Postgres via `sqlx`. Every statement
/// below runs through the pool's deferred query builder rather than the
/// `query!` compile-time macro, since this crate has no live database to
/// check SQL against at build time — correctness here rests on the
/// adapter's own integration tests run against a real database.
pub struct PgStorageAdapter {
    pool: PgPool,
}

impl PgStorageAdapter {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(PgStorageAdapter { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStorageAdapter { pool }
    }
}

#[async_trait]
impl StorageAdapter for PgStorageAdapter {
    async fn load_question(&self, question_id: &str) -> Result<QuestionContent, StorageError> {
        let row = sqlx::query(
            "SELECT id, text, answers, correct_answer_id, time_limit_ms, base_points \
             FROM questions WHERE id = $1",
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::QuestionNotFound(question_id.to_string()))?;

        let answers_json: serde_json::Value = row.try_get("answers")?;
        let answers = serde_json::from_value(answers_json).unwrap_or_default();

        Ok(QuestionContent {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            answers,
            correct_answer_id: row.try_get("correct_answer_id")?,
            time_limit_ms: row.try_get::<i64, _>("time_limit_ms")? as u64,
            base_points: row.try_get::<i32, _>("base_points")? as u32,
        })
    }

    async fn load_ruleset(&self, ruleset_id: &str) -> Result<Ruleset, StorageError> {
        let row = sqlx::query(
            "SELECT points_per_correct, points_for_speed, streak_bonus, streak_threshold, \
             streak_multiplier, time_limit_ms FROM rulesets WHERE id = $1",
        )
        .bind(ruleset_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::RulesetNotFound(ruleset_id.to_string()))?;

        Ok(Ruleset {
            points_per_correct: row.try_get::<i32, _>("points_per_correct")? as u32,
            points_for_speed: row.try_get("points_for_speed")?,
            streak_bonus: row.try_get("streak_bonus")?,
            streak_threshold: row.try_get::<i32, _>("streak_threshold")? as u32,
            streak_multiplier: row.try_get("streak_multiplier")?,
            time_limit_ms: row.try_get::<i64, _>("time_limit_ms")? as u64,
        })
    }

    async fn load_roster(&self, session_id: &str) -> Result<Roster, StorageError> {
        let team_rows = sqlx::query(
            "SELECT id, display_name, color, side FROM teams \
             WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut teams = Vec::with_capacity(team_rows.len());
        for row in &team_rows {
            let side_str: String = row.try_get("side")?;
            let side = if side_str == "left" { Side::Left } else { Side::Right };
            teams.push(Team {
                id: row.try_get("id")?,
                display_name: row.try_get("display_name")?,
                color: row.try_get("color")?,
                side,
                score: 0,
                streak: Streak::default(),
            });
        }

        let student_rows = sqlx::query(
            "SELECT id, nickname, team_id FROM students \
             WHERE session_id = $1 AND status != 'kicked'",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut students = std::collections::HashMap::with_capacity(student_rows.len());
        for row in &student_rows {
            let id: String = row.try_get("id")?;
            students.insert(
                id.clone(),
                Student {
                    id,
                    nickname: row.try_get("nickname")?,
                    team_id: row.try_get("team_id")?,
                    status: ConnectionStatus::Disconnected,
                },
            );
        }

        Ok(Roster { teams, students })
    }

    async fn insert_question_instance(&self, instance: &QuestionInstance) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO question_instances \
             (id, question_id, index, text, answers, correct_answer_id, time_limit_ms, base_points, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, to_timestamp($9 / 1000.0))",
        )
        .bind(&instance.id)
        .bind(&instance.question_id)
        .bind(instance.index as i32)
        .bind(&instance.text)
        .bind(serde_json::to_value(&instance.answers).unwrap_or_default())
        .bind(&instance.correct_answer_id)
        .bind(instance.time_limit_ms as i64)
        .bind(instance.base_points as i32)
        .bind(instance.started_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end_question_instance(&self, instance_id: &str, ended_at_ms: u64) -> Result<(), StorageError> {
        sqlx::query("UPDATE question_instances SET ended_at = to_timestamp($2 / 1000.0) WHERE id = $1")
            .bind(instance_id)
            .bind(ended_at_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO attempts \
             (question_instance_id, student_id, answer_id, is_correct, response_time_ms, points_awarded, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, to_timestamp($7 / 1000.0)) \
             ON CONFLICT (question_instance_id, student_id) DO NOTHING",
        )
        .bind(&attempt.question_instance_id)
        .bind(&attempt.student_id)
        .bind(&attempt.answer_id)
        .bind(attempt.is_correct)
        .bind(attempt.response_time_ms as i64)
        .bind(attempt.points_awarded as i32)
        .bind(attempt.timestamp_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_strength_event(&self, session_id: &str, event: &StrengthEvent) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO strength_events \
             (session_id, team_id, delta, reason, new_position, trigger_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, to_timestamp($7 / 1000.0))",
        )
        .bind(session_id)
        .bind(&event.team_id)
        .bind(event.scaled_delta())
        .bind(event.reason.as_str())
        .bind(event.new_position)
        .bind(&event.trigger_id)
        .bind(event.timestamp_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_session_on_end(&self, session_id: &str, final_position: f64, ended_at_ms: u64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sessions SET status = 'completed', final_position = $2, ended_at = to_timestamp($3 / 1000.0) WHERE id = $1",
        )
        .bind(session_id)
        .bind(final_position)
        .bind(ended_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_student_connection(&self, student_id: &str, status: ConnectionStatus, last_seen_at_ms: u64) -> Result<(), StorageError> {
        let status_str = match status {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Kicked => "kicked",
        };
        sqlx::query("UPDATE students SET status = $2, last_seen_at = to_timestamp($3 / 1000.0) WHERE id = $1")
            .bind(student_id)
            .bind(status_str)
            .bind(last_seen_at_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_student_team(&self, student_id: &str, team_id: Option<&str>) -> Result<(), StorageError> {
        sqlx::query("UPDATE students SET team_id = $2 WHERE id = $1")
            .bind(student_id)
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
