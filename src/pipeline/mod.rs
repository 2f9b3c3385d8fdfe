//! Streaming bridge and its supporting turn-level logic (spec §4.7, §4.8).

pub mod bridge;
pub mod corrective;
pub mod sentence;

pub use bridge::{Bridge, TurnOutcome};
