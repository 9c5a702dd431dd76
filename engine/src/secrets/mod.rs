pub mod cache;
pub mod string;

pub use cache::SecretCache;
pub use string::SecretString;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// Keychain key of the service principal client secret
pub const CLIENT_SECRET_KEY: &str = "azure_client_secret";

/// Keychain key of the Azure OpenAI resource key
pub const API_KEY_KEY: &str = "azure_openai_api_key";

/// Secrets managed by `datachat secret`
pub const KNOWN_SECRETS: &[&str] = &[CLIENT_SECRET_KEY, API_KEY_KEY];

/// SecretManager handles secure storage and retrieval of secrets using the OS keychain.
///
/// Secrets are stored in:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
///
/// Unlike an interactive lookup, a missing secret is reported as
/// `EngineError::MissingCredential`; prompting only happens through
/// `prompt_and_store`, which backs `datachat secret set`.
///
/// The SecretManager also provides secret scrubbing functionality to remove
/// sensitive data from log output and error messages.
pub struct SecretManager {
    service_name: String,
}

/// Regex patterns for detecting common secret formats.
static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Initializes and returns the secret detection patterns.
///
/// Patterns match:
/// - Bearer tokens: Bearer\s+[^\s]{20,}
/// - JWTs (Entra ID access tokens): eyJ...\.eyJ...\....
/// - Entra ID client secrets: xxx8Q~...
/// - Azure resource keys: 32 lowercase hex characters
/// - OpenAI style keys: sk-...
fn get_secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
            Regex::new(r"eyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]*")
                .expect("Invalid JWT pattern"),
            Regex::new(r"[A-Za-z0-9_.\-]{3}[0-9]Q~[A-Za-z0-9_~.\-]{31,34}")
                .expect("Invalid client secret pattern"),
            Regex::new(r"\b[a-f0-9]{32}\b").expect("Invalid resource key pattern"),
            Regex::new(r"sk-[a-zA-Z0-9\-_]{20,}").expect("Invalid OpenAI pattern"),
        ]
    })
}

impl SecretManager {
    /// Creates a new SecretManager with the given service name.
    ///
    /// The service name is used to namespace secrets in the OS keychain.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Retrieves a secret from the OS keychain.
    ///
    /// # Errors
    /// Returns `EngineError::MissingCredential` if no entry exists and
    /// `EngineError::KeyringError` if keychain access fails.
    pub fn get_secret(&self, key: &str) -> Result<String, EngineError> {
        let entry = self.entry(key)?;

        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(secret)
            }
            Err(keyring::Error::NoEntry) => Err(EngineError::MissingCredential(key.to_string())),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Stores a secret in the OS keychain.
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let entry = self.entry(key)?;

        entry.set_password(value).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Deletes a secret from the OS keychain.
    pub fn delete_secret(&self, key: &str) -> Result<(), EngineError> {
        let entry = self.entry(key)?;

        entry.delete_password().map_err(|e| {
            EngineError::KeyringError(format!("Failed to delete secret '{}': {}", key, e))
        })?;

        tracing::info!("Deleted secret '{}' from keychain", key);
        Ok(())
    }

    /// Checks if a secret exists in the OS keychain.
    pub fn has_secret(&self, key: &str) -> bool {
        match self.entry(key) {
            Ok(entry) => entry.get_password().is_ok(),
            Err(_) => false,
        }
    }

    /// Prompts for a secret without echoing it and stores it in the keychain.
    ///
    /// The prompt is written to stderr so it never mixes with command output.
    pub fn prompt_and_store(&self, key: &str) -> Result<(), EngineError> {
        let secret = rpassword::prompt_password_stderr(&format!("Enter value for '{}': ", key))
            .map_err(|e| EngineError::KeyringError(format!("Failed to read input: {}", e)))?;

        let secret = secret.trim();
        if secret.is_empty() {
            return Err(EngineError::KeyringError(
                "Secret cannot be empty".to_string(),
            ));
        }

        self.set_secret(key, secret)
    }

    /// Scrubs secrets from text by replacing them with [REDACTED].
    ///
    /// Use this on remote error bodies before they reach logs or the transcript.
    ///
    /// # Examples
    /// ```
    /// use datachat_engine::secrets::SecretManager;
    ///
    /// let manager = SecretManager::new("test");
    /// let scrubbed = manager.scrub("key 0123456789abcdef0123456789abcdef rejected");
    /// assert_eq!(scrubbed, "key [REDACTED] rejected");
    /// ```
    pub fn scrub(&self, text: &str) -> String {
        scrub(text)
    }

    fn entry(&self, key: &str) -> Result<Entry, EngineError> {
        Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })
    }
}

/// Free-standing form of [`SecretManager::scrub`] for code without a manager.
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();

    for pattern in get_secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }

    result
}
