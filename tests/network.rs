//! Network integration tests.
//!
//! This module contains integration tests for the link layer under load:
//! - Whole games over ChaosTransport (loss, duplicates, corruption, garbage)
//! - Real UDP sockets on the loopback interface

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Network test modules
mod network {
    pub mod lossy;
    pub mod udp;
}
