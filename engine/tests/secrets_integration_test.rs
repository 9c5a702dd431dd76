use datachat_engine::secrets::{SecretCache, SecretManager, CLIENT_SECRET_KEY};
use datachat_engine::service::ServiceError;
use std::sync::Arc;

fn keychain_available(manager: &SecretManager) -> bool {
    if std::env::var("CI").is_ok() {
        return false; // Skip: no keyring in CI
    }
    manager.set_secret("datachat_keychain_check", "check").is_ok()
        && manager.delete_secret("datachat_keychain_check").is_ok()
}

#[test]
fn test_secret_manager_overwrite() {
    let manager = SecretManager::new("datachat-integration-test");
    if !keychain_available(&manager) {
        return;
    }

    let key = "azure_openai_api_key_overwrite";
    manager.set_secret(key, "first").expect("Failed to store secret");
    manager.set_secret(key, "second").expect("Failed to overwrite secret");

    assert_eq!(manager.get_secret(key).unwrap(), "second");
    assert!(manager.has_secret(key));

    manager.delete_secret(key).expect("Failed to delete secret");
    assert!(!manager.has_secret(key));
}

#[test]
fn test_missing_secret_reports_missing_credential() {
    let manager = SecretManager::new("datachat-integration-test");
    if !keychain_available(&manager) {
        return;
    }

    let err = manager.get_secret("azure_client_secret_never_set").unwrap_err();
    assert!(matches!(err, sdk::errors::EngineError::MissingCredential(_)));
}

#[test]
fn test_cache_serves_inserted_secret_without_keychain() {
    let cache = SecretCache::without_env(Arc::new(SecretManager::new("datachat-integration-test")));
    cache.insert(CLIENT_SECRET_KEY, "from-cache");

    let secret = cache.get_secret(CLIENT_SECRET_KEY).unwrap();
    assert_eq!(secret.unsecure(), "from-cache");
    assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
    assert!(cache.preload(&[CLIENT_SECRET_KEY]).is_ok());
}

#[test]
fn test_scrub_integration_error_messages() {
    let key = "0123456789abcdef0123456789abcdef";
    let err = ServiceError::Rejected {
        status: 400,
        body: datachat_engine::secrets::scrub(&format!("bad api-key {} supplied", key)),
    };

    let message = err.to_string();
    assert!(!message.contains(key));
    assert!(message.contains("[REDACTED]"));
}

#[test]
fn test_scrub_integration_preserves_non_secrets() {
    let text = "Run run_abc123 on thread_xyz failed: rate limit reached for gpt-4o";
    assert_eq!(datachat_engine::secrets::scrub(text), text);
}
