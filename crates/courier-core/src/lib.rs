//! # Courier Core
//!
//! Core types and error definitions shared by the Courier client harnesses.
//! This crate provides the error taxonomy, result aliases, and telemetry
//! bootstrap used by the queue and cache crates.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
