//! # Stratus Core
//!
//! Shared foundations for the Stratus emulator: transport-independent error
//! kinds, the per-request operation context (cancellation + deadline), the
//! flat process configuration, and timestamp formatting helpers.
//!
//! Every service crate in the workspace speaks in terms of these types; the
//! HTTP adapter is the only place where they are translated to wire shapes.

pub mod config;
pub mod context;
pub mod error;
pub mod time;

pub use config::Config;
pub use context::OpContext;
pub use error::{ErrorKind, Result, StratusError};
