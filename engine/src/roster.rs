//! Teams, students, and the two-sided tug roster.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::SessionError;

/// Which end of the rope a team pulls toward. The first team created in a
/// session is `Left`; the second is `Right`. A lower position favors
/// `Left`, a higher position favors `Right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// The sign applied to a tug magnitude pulled by a team on this side:
    /// `Left` pulls the position down, `Right` pulls it up.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Streak {
    pub current: u32,
    pub max: u32,
}

impl Streak {
    /// Records a correct answer, bumping `current` and, if it is a new
    /// personal best, `max` as well.
    pub fn record_correct(&mut self) {
        self.current += 1;
        if self.current > self.max {
            self.max = self.current;
        }
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub display_name: String,
    pub color: String,
    pub side: Side,
    pub score: i64,
    pub streak: Streak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Kicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub nickname: String,
    pub team_id: Option<String>,
    pub status: ConnectionStatus,
}

/// The roster for a single session: an ordered pair of teams (left created
/// first) and the students assigned to them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    pub teams: Vec<Team>,
    pub students: HashMap<String, Student>,
}

impl Roster {
    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    pub fn team_mut(&mut self, team_id: &str) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.id == team_id)
    }

    pub fn team_by_side(&self, side: Side) -> Option<&Team> {
        self.teams.iter().find(|t| t.side == side)
    }

    pub fn require_team(&self, team_id: &str) -> Result<&Team, SessionError> {
        self.team(team_id)
            .ok_or_else(|| SessionError::UnknownTeam(team_id.to_string()))
    }

    pub fn require_student(&self, student_id: &str) -> Result<&Student, SessionError> {
        self.students
            .get(student_id)
            .ok_or_else(|| SessionError::UnknownStudent(student_id.to_string()))
    }

    /// Resets every team's current streak to zero except `winner_team_id`,
    /// whose streak is advanced instead. Called after a correct answer is
    /// admitted, per the rule that answering preserves one team's streak
    /// and clears everyone else's.
    pub fn advance_streak(&mut self, winner_team_id: &str) -> u32 {
        let mut new_current = 0;
        for team in &mut self.teams {
            if team.id == winner_team_id {
                team.streak.record_correct();
                new_current = team.streak.current;
            } else {
                team.streak.reset();
            }
        }
        new_current
    }
}
