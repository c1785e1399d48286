//! Question instances, attempts, and strength events — the three
//! append-only record kinds the engine writes through the Storage Adapter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
}

/// A ask-time snapshot of a question. Immutable once written: even if the
/// underlying question content is later edited by the REST layer, this
/// instance keeps recording the text and options as they were when asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionInstance {
    pub id: String,
    pub question_id: String,
    pub index: u32,
    pub text: String,
    pub answers: Vec<AnswerOption>,
    pub correct_answer_id: String,
    pub time_limit_ms: u64,
    pub base_points: u32,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
}

impl QuestionInstance {
    pub fn is_active(&self) -> bool {
        self.ended_at_ms.is_none()
    }

    pub fn deadline_ms(&self) -> u64 {
        self.started_at_ms + self.time_limit_ms
    }

    /// Whether `now_ms` is still within the answerable window: the
    /// boundary itself is inclusive, so a submission landing exactly on
    /// the deadline is accepted.
    pub fn accepts_at(&self, now_ms: u64) -> bool {
        self.is_active() && now_ms <= self.deadline_ms()
    }

    pub fn option(&self, answer_id: &str) -> Option<&AnswerOption> {
        self.answers.iter().find(|a| a.id == answer_id)
    }

    /// The student-safe projection broadcast as a `question` event: strips
    /// `correct_answer_id` entirely.
    pub fn student_view(&self) -> QuestionStudentView<'_> {
        QuestionStudentView {
            id: &self.id,
            text: &self.text,
            answers: &self.answers,
            time_limit_ms: self.time_limit_ms,
            points: self.base_points,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionStudentView<'a> {
    pub id: &'a str,
    pub text: &'a str,
    pub answers: &'a [AnswerOption],
    pub time_limit_ms: u64,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub question_instance_id: String,
    pub student_id: String,
    pub answer_id: String,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub points_awarded: u32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthEventReason {
    CorrectAnswer,
    StreakBonus,
    ManualAdjust,
}

impl StrengthEventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthEventReason::CorrectAnswer => "correct_answer",
            StrengthEventReason::StreakBonus => "streak_bonus",
            StrengthEventReason::ManualAdjust => "manual_adjust",
        }
    }
}

/// A single rope-position mutation. `delta` is the signed, human-scale
/// value (e.g. `-1.4`); callers that persist this record scale it by 10
/// and store it as an integer, per the wire stability rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthEvent {
    pub team_id: Option<String>,
    pub delta: f64,
    pub reason: StrengthEventReason,
    pub new_position: f64,
    pub trigger_id: String,
    pub timestamp_ms: u64,
}

impl StrengthEvent {
    /// The delta scaled ×10 and rounded to the nearest integer, in the
    /// form the relational store persists.
    pub fn scaled_delta(&self) -> i64 {
        (self.delta * 10.0).round() as i64
    }
}

/// Per-team aggregate stats for a question's `question_reveal` payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeamQuestionStats {
    pub attempts: u32,
    pub correct: u32,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuestionStats {
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub team_stats: HashMap<String, TeamQuestionStats>,
}

/// Computes reveal-time aggregate stats from the attempts recorded against
/// one instance, grouping by the team each answering student belonged to.
pub fn aggregate_stats(
    attempts: &[Attempt],
    student_team: impl Fn(&str) -> Option<String>,
) -> QuestionStats {
    let mut stats = QuestionStats::default();
    let mut response_sums: HashMap<String, u64> = HashMap::new();

    for attempt in attempts {
        stats.total_attempts += 1;
        if attempt.is_correct {
            stats.correct_attempts += 1;
        }
        if let Some(team_id) = student_team(&attempt.student_id) {
            let entry = stats.team_stats.entry(team_id.clone()).or_default();
            entry.attempts += 1;
            if attempt.is_correct {
                entry.correct += 1;
            }
            *response_sums.entry(team_id).or_default() += attempt.response_time_ms;
        }
    }

    for (team_id, team_stat) in stats.team_stats.iter_mut() {
        if team_stat.attempts > 0 {
            let sum = response_sums.get(team_id).copied().unwrap_or(0);
            team_stat.average_response_time_ms = sum as f64 / team_stat.attempts as f64;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> QuestionInstance {
        QuestionInstance {
            id: "qi1".into(),
            question_id: "q1".into(),
            index: 0,
            text: "2 + 2?".into(),
            answers: vec![
                AnswerOption { id: "a".into(), text: "3".into() },
                AnswerOption { id: "b".into(), text: "4".into() },
            ],
            correct_answer_id: "b".into(),
            time_limit_ms: 30_000,
            base_points: 10,
            started_at_ms: 0,
            ended_at_ms: None,
        }
    }

    #[test]
    fn accepts_submission_exactly_at_deadline() {
        let inst = instance();
        assert!(inst.accepts_at(30_000));
        assert!(!inst.accepts_at(30_001));
    }

    #[test]
    fn student_view_omits_correct_answer() {
        let inst = instance();
        let view = inst.student_view();
        assert_eq!(view.id, "qi1");
        assert_eq!(view.answers.len(), 2);
    }

    #[test]
    fn aggregate_stats_group_by_team_and_average_response_time() {
        let attempts = vec![
            Attempt {
                question_instance_id: "qi1".into(),
                student_id: "s1".into(),
                answer_id: "b".into(),
                is_correct: true,
                response_time_ms: 1000,
                points_awarded: 14,
                timestamp_ms: 1000,
            },
            Attempt {
                question_instance_id: "qi1".into(),
                student_id: "s2".into(),
                answer_id: "a".into(),
                is_correct: false,
                response_time_ms: 3000,
                points_awarded: 0,
                timestamp_ms: 3000,
            },
        ];
        let team_of = |student_id: &str| -> Option<String> {
            match student_id {
                "s1" => Some("L".into()),
                "s2" => Some("L".into()),
                _ => None,
            }
        };
        let stats = aggregate_stats(&attempts, team_of);
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.correct_attempts, 1);
        let team = stats.team_stats.get("L").unwrap();
        assert_eq!(team.attempts, 2);
        assert_eq!(team.correct, 1);
        assert_eq!(team.average_response_time_ms, 2000.0);
    }

    #[test]
    fn scaled_delta_rounds_to_nearest_integer() {
        let event = StrengthEvent {
            team_id: Some("L".into()),
            delta: -1.4,
            reason: StrengthEventReason::CorrectAnswer,
            new_position: 48.6,
            trigger_id: "s1".into(),
            timestamp_ms: 1000,
        };
        assert_eq!(event.scaled_delta(), -14);
    }
}
