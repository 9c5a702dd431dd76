//! Datachat SDK
//!
//! Shared types and error handling for datachat components.
//! This crate is used by the engine and by anything that renders transcripts.

/// Error types and handling
pub mod errors;

/// Conversation and session types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{Role, SessionState, Turn, TurnOutcome, NO_RESPONSE_TEXT};
