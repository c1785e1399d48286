//! Pure point and rope-delta arithmetic.
//!
//! Both functions here take every input they need as an argument and touch
//! no session state directly, so they can be exercised in isolation against
//! the documented example numbers.

use crate::roster::Side;
use crate::ruleset::Ruleset;

/// Points awarded for a correct answer.
///
/// `base` is `ruleset.points_per_correct`, falling back to the question
/// instance's own recorded base points when the caller has one (the two
/// are usually equal; the instance value exists so that a ruleset change
/// mid-session cannot retroactively alter an already-asked question).
///
/// `speed_bonus = floor(base * 0.5 * max(0, 1 - response_time_ms / time_limit_ms))`
/// when `ruleset.points_for_speed` is set, otherwise zero.
///
/// # Examples
///
/// ```rust
/// use classroom_engine::ruleset::Ruleset;
/// use classroom_engine::scoring::compute_points;
///
/// let ruleset = Ruleset::default();
/// assert_eq!(compute_points(&ruleset, 10, 3_000, 30_000), 14);
/// ```
pub fn compute_points(ruleset: &Ruleset, base: u32, response_time_ms: u64, time_limit_ms: u64) -> u32 {
    let speed_bonus = if ruleset.points_for_speed && time_limit_ms > 0 {
        let fraction_remaining = 1.0 - (response_time_ms as f64 / time_limit_ms as f64);
        let fraction_remaining = fraction_remaining.max(0.0);
        (base as f64 * 0.5 * fraction_remaining).floor() as u32
    } else {
        0
    };
    base + speed_bonus
}

/// Signed tug delta for a correct answer scored `points`, pulled by a team
/// on `side` whose streak stands at `streak_current` *after* this answer
/// has been folded in.
///
/// Magnitude is `points / 10`, multiplied by `ruleset.streak_multiplier`
/// when `streak_current >= ruleset.streak_threshold` and
/// `ruleset.streak_bonus` is enabled — the multiplier is applied to the
/// magnitude, never to the raw point total.
///
/// # Examples
///
/// ```rust
/// use classroom_engine::ruleset::Ruleset;
/// use classroom_engine::roster::Side;
/// use classroom_engine::scoring::compute_delta;
///
/// let ruleset = Ruleset::default();
/// let delta = compute_delta(&ruleset, Side::Left, 14, 1);
/// assert_eq!(delta, -1.4);
/// ```
pub fn compute_delta(ruleset: &Ruleset, side: Side, points: u32, streak_current: u32) -> f64 {
    let mut magnitude = points as f64 / 10.0;
    if ruleset.streak_bonus && streak_current >= ruleset.streak_threshold {
        magnitude *= ruleset.streak_multiplier;
    }
    side.sign() * magnitude
}
