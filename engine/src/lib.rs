//! # classroom-engine: Session Engine Core
//!
//! Pure, synchronous game logic for a single classroom trivia "rope tug"
//! session. This crate has no knowledge of networking, persistence, or
//! wall-clock timers beyond the timestamps it is handed — every operation
//! is a deterministic function from `(SessionState, Input)` to
//! `(SessionState, Vec<Effect>)` or an error, which is what lets the hosting
//! process rehydrate a session from a persisted snapshot without losing any
//! rules fidelity.
//!
//! ## Core Modules
//!
//! - [`phase`] - the lobby → ready → active_question → reveal/paused →
//!   completed state machine
//! - [`roster`] - teams and students and their membership rules
//! - [`ruleset`] - per-session tunable scoring and timing parameters
//! - [`scoring`] - pure point and rope-delta calculations
//! - [`rope`] - the tug-of-war position and clamping behavior
//! - [`question`] - question instance lifecycle and attempt recording
//! - [`session_state`] - the aggregate root tying the above together
//! - [`errors`] - error types for session operations
//!
//! ## Quick Start
//!
//! ```rust
//! use classroom_engine::ruleset::Ruleset;
//! use classroom_engine::roster::Side;
//! use classroom_engine::scoring::{compute_points, compute_delta};
//!
//! let ruleset = Ruleset::default();
//! let points = compute_points(&ruleset, 10, 3_000, 30_000);
//! let delta = compute_delta(&ruleset, Side::Left, points, 1);
//! println!("points = {points}, delta = {delta}");
//! ```
//!
//! ## Deterministic Replay
//!
//! Every mutation taken against a [`session_state::SessionState`] is a pure
//! function of its current fields and the supplied input, including the
//! `now` timestamp used for deadline checks:
//!
//! ```rust
//! use classroom_engine::session_state::SessionState;
//! use classroom_engine::ruleset::Ruleset;
//!
//! let state = SessionState::new("session-1".into(), Ruleset::default());
//! assert_eq!(state.phase(), classroom_engine::phase::Phase::Lobby);
//! ```
//!
//! ## Non-goals
//!
//! This crate does not open sockets, does not write to disk, and does not
//! read the system clock. The hosting process is responsible for all of
//! that; this crate only ever sees timestamps passed in as arguments.

pub mod errors;
pub mod phase;
pub mod question;
pub mod roster;
pub mod rope;
pub mod ruleset;
pub mod scoring;
pub mod session_state;
pub mod snapshot;
