//! Datachat Engine Library
//!
//! Session orchestration for asking questions about a dataset through a
//! remote code-interpreter agent. Used by the `datachat` binary and by the
//! integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Credential resolution and token management
pub mod auth;

/// Remote agent service contract and Azure implementation
pub mod service;

/// Bounded retry with backoff
pub mod retry;

/// Session orchestrator
pub mod session;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
