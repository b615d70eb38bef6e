//! Core domain + application logic for the Telegram channel triage agent.
//!
//! This crate is intentionally transport-agnostic. The MTProto client lives
//! behind the [`transport::port::Transport`] port, implemented in adapter crates.

pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod digest;
pub mod document;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod pacing;
pub mod scheduler;
pub mod supervisor;
pub mod transport;
pub mod triage;

pub use errors::{Error, Result};
