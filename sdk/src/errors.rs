//! Error types and handling
//!
//! This module provides the error types shared by the datachat engine and
//! anything embedding it. Errors implement the `ErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! All error messages are scrubbed to ensure:
//! - No secrets (client secrets, API keys, bearer tokens) are included
//! - All messages are safe to display to end users

use thiserror::Error;

/// Trait for engine error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by the user (fix the
    /// file, ask again). Non-recoverable errors need configuration changes.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Secrets**: Keychain access and missing credentials
/// - **Artifact**: Dataset file problems detected before upload
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::EmptyArtifact("data.csv".into());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::MissingCredential("azure_client_secret".into());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Secret errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    // Artifact errors
    #[error("Artifact is empty: {0}")]
    EmptyArtifact(String),

    #[error("Artifact too large: {size} bytes > {limit} bytes")]
    ArtifactTooLarge { size: u64, limit: u64 },

    #[error("Unsupported artifact type: {0}")]
    UnsupportedArtifact(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::MissingCredential(_) => {
                "Credentials not found. Run 'datachat secret set' or export the AZURE_* variables"
            }

            Self::EmptyArtifact(_) => "The dataset file is empty",
            Self::ArtifactTooLarge { .. } => "The dataset is too large. Upload a smaller file",
            Self::UnsupportedArtifact(_) => "Upload a delimited text file such as .csv or .tsv",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::KeyringError(_) | Self::MissingCredential(_) => false,
            _ => true,
        }
    }
}
