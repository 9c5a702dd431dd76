//! Authentication
//!
//! Resolves the configured credential mode into a [`Credential`] and turns it
//! into request headers. Entra ID service principals use the OAuth2 client
//! credentials grant; the resulting bearer token is cached and refreshed
//! shortly before it expires. Resource keys are sent as-is.

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{AuthConfig, AuthMode};
use crate::secrets::{self, SecretCache, SecretString, API_KEY_KEY, CLIENT_SECRET_KEY};
use crate::service::ServiceError;

/// Refresh tokens this long before the service would reject them
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3599;

/// Credential material for the remote service
#[derive(Debug, Clone)]
pub enum Credential {
    /// Entra ID application identity
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: SecretString,
    },

    /// Azure OpenAI resource key
    ApiKey(SecretString),
}

impl Credential {
    /// Resolve the credential for the configured mode.
    ///
    /// Secrets come from `secrets` (environment, then keychain). The `default`
    /// mode reads the ambient `AZURE_*` environment variables.
    pub fn resolve(auth: &AuthConfig, secrets: &SecretCache) -> Result<Self, ServiceError> {
        Self::resolve_with(auth, secrets, |name| std::env::var(name).ok())
    }

    /// [`Credential::resolve`] with an injectable environment lookup.
    pub fn resolve_with<F>(
        auth: &AuthConfig,
        secrets: &SecretCache,
        env: F,
    ) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match auth.mode {
            AuthMode::ServicePrincipal => {
                let tenant_id = required(auth.tenant_id.as_deref(), "auth.tenant_id")?;
                let client_id = required(auth.client_id.as_deref(), "auth.client_id")?;
                let client_secret = secrets
                    .get_secret(CLIENT_SECRET_KEY)
                    .map_err(|e| ServiceError::AuthenticationFailed(e.to_string()))?;

                Ok(Credential::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                })
            }
            AuthMode::ApiKey => secrets
                .get_secret(API_KEY_KEY)
                .map(Credential::ApiKey)
                .map_err(|e| ServiceError::AuthenticationFailed(e.to_string())),
            AuthMode::Default => {
                let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

                if let (Some(tenant_id), Some(client_id), Some(secret)) = (
                    var("AZURE_TENANT_ID"),
                    var("AZURE_CLIENT_ID"),
                    var("AZURE_CLIENT_SECRET"),
                ) {
                    debug!("Using service principal credentials from environment");
                    return Ok(Credential::ServicePrincipal {
                        tenant_id,
                        client_id,
                        client_secret: SecretString::new(secret),
                    });
                }

                if let Some(key) = var("AZURE_OPENAI_API_KEY") {
                    debug!("Using resource key from environment");
                    return Ok(Credential::ApiKey(SecretString::new(key)));
                }

                Err(ServiceError::AuthenticationFailed(
                    "no ambient credentials found (set AZURE_TENANT_ID, AZURE_CLIENT_ID and \
                     AZURE_CLIENT_SECRET, or AZURE_OPENAI_API_KEY)"
                        .to_string(),
                ))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ServicePrincipal { .. } => "service_principal",
            Credential::ApiKey(_) => "api_key",
        }
    }
}

fn required(value: Option<&str>, name: &str) -> Result<String, ServiceError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::AuthenticationFailed(format!("{} is not configured", name)))
}

/// Header that authenticates one request
#[derive(Debug, Clone)]
pub enum AuthHeader {
    Bearer(SecretString),
    ApiKey(SecretString),
}

impl AuthHeader {
    /// Attach this header to a request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthHeader::Bearer(token) => {
                request.header("Authorization", format!("Bearer {}", token.unsecure()))
            }
            AuthHeader::ApiKey(key) => request.header("api-key", key.unsecure()),
        }
    }
}

struct CachedToken {
    token: SecretString,
    refresh_at: Instant,
}

/// Issues auth headers, caching service principal tokens
pub struct TokenProvider {
    credential: Credential,
    authority: String,
    scope: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TokenProvider {
    pub fn new(credential: Credential, auth: &AuthConfig, client: reqwest::Client) -> Self {
        Self {
            credential,
            authority: auth.authority.trim_end_matches('/').to_string(),
            scope: auth.scope.clone(),
            client,
            cached: Mutex::new(None),
        }
    }

    /// Header for the next request, fetching a new token when needed
    pub async fn header(&self) -> Result<AuthHeader, ServiceError> {
        let (tenant_id, client_id, client_secret) = match &self.credential {
            Credential::ApiKey(key) => return Ok(AuthHeader::ApiKey(key.clone())),
            Credential::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => (tenant_id, client_id, client_secret),
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(AuthHeader::Bearer(token.token.clone()));
            }
            debug!("Cached access token is about to expire, refreshing");
        }

        let (token, lifetime) = self
            .request_token(tenant_id, client_id, client_secret)
            .await?;
        let refresh_in = lifetime.saturating_sub(TOKEN_EXPIRY_BUFFER);
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: Instant::now() + refresh_in,
        });

        Ok(AuthHeader::Bearer(token))
    }

    async fn request_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<(SecretString, Duration), ServiceError> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.unsecure()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::AuthenticationFailed(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                secrets::scrub(&text)
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(format!("token response: {}", e)))?;

        let lifetime = Duration::from_secs(data.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        info!("Acquired access token for client {} (valid {:?})", client_id, lifetime);

        Ok((SecretString::new(data.access_token), lifetime))
    }
}
