//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `arena`: a whole installation (coordinator, four controllers, display) on
//!   one simulated link, with scripted players and a manual clock
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{Arena, Player};
//! ```

pub mod arena;

// Some integration crates only use a subset of the helpers.
#[allow(unused_imports)]
pub use arena::{ms, reaction_game, shake_game, slot, Arena, Player, TICK};
