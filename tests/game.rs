//! Whole-installation integration tests.
//!
//! Every test here runs a coordinator, four controllers and a display on one
//! lossless in-memory link with scripted players:
//! - Complete games in both round modes
//! - Slot joining, prompt timeouts and skip requests
//! - What the display ends up showing

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Game test modules
mod game {
    pub mod display;
    pub mod joining;
    pub mod scenario;
}
