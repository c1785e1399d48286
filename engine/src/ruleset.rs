//! Per-session tunable scoring and timing parameters.
//!
//! A [`Ruleset`] is loaded once at `init` time from the ruleset row named
//! in the `init` command (or defaulted if none was given) and held for the
//! lifetime of the session; the engine never mutates it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub points_per_correct: u32,
    pub points_for_speed: bool,
    pub streak_bonus: bool,
    pub streak_threshold: u32,
    pub streak_multiplier: f64,
    pub time_limit_ms: u64,
}

impl Default for Ruleset {
    fn default() -> Self {
        Ruleset {
            points_per_correct: 10,
            points_for_speed: true,
            streak_bonus: true,
            streak_threshold: 3,
            streak_multiplier: 1.5,
            time_limit_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_example_ruleset() {
        let r = Ruleset::default();
        assert_eq!(r.points_per_correct, 10);
        assert!(r.points_for_speed);
        assert!(r.streak_bonus);
        assert_eq!(r.streak_threshold, 3);
        assert_eq!(r.streak_multiplier, 1.5);
        assert_eq!(r.time_limit_ms, 30_000);
    }
}
