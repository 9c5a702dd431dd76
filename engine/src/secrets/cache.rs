use crate::secrets::string::SecretString;
use crate::secrets::SecretManager;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An in-memory cache in front of environment variables and the OS keychain.
///
/// Lookup order for a key such as `azure_client_secret`:
/// 1. the in-memory cache
/// 2. the upper-cased environment variable (`AZURE_CLIENT_SECRET`)
/// 3. the keychain via `SecretManager`
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
    read_env: bool,
}

impl SecretCache {
    /// Creates a new SecretCache wrapping the provided SecretManager
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
            read_env: true,
        }
    }

    /// A cache that never consults environment variables
    pub fn without_env(manager: Arc<SecretManager>) -> Self {
        Self {
            read_env: false,
            ..Self::new(manager)
        }
    }

    /// Retrieves a secret, caching it on first success.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self.cache.read().expect("SecretCache lock poisoned");
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = match self.from_env(key) {
            Some(value) => {
                tracing::debug!("Using secret '{}' from environment", key);
                SecretString::new(value)
            }
            None => SecretString::new(self.manager.get_secret(key)?),
        };

        self.insert(key, secret.clone());
        Ok(secret)
    }

    /// Seeds the cache, bypassing env and keychain lookups.
    pub fn insert(&self, key: &str, secret: impl Into<SecretString>) {
        let mut cache = self.cache.write().expect("SecretCache lock poisoned");
        cache.insert(key.to_string(), secret.into());
    }

    /// Pre-loads a set of keys so missing credentials surface early.
    pub fn preload(&self, keys: &[&str]) -> Result<(), EngineError> {
        for key in keys {
            self.get_secret(key)?;
        }
        Ok(())
    }

    fn from_env(&self, key: &str) -> Option<String> {
        if !self.read_env {
            return None;
        }
        std::env::var(key.to_ascii_uppercase())
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}
