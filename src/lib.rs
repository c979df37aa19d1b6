//! Narravox - turns uploaded videos into narrated voiceovers
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod error;
pub mod frames;
pub mod script;
pub mod server;
pub mod speech;
pub mod state;
