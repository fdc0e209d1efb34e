//! Minimal secrets retrieval. The only secret OrMind's core needs directly
//! is the Audit Agent's HMAC key (spec §4.6); everything else (provider
//! credentials) is the Provider Adapter's concern. Kept as a trait so a
//! future vault-backed provider can replace the environment lookup without
//! touching callers.

use async_trait::async_trait;
use std::env;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
    #[error("secret value for '{0}' is empty")]
    Empty(String),
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, key: &str) -> Result<String, SecretError>;
}

/// Reads secrets straight from the process environment. This is the only
/// provider wired up today; the trait exists so swapping in a vault client
/// later doesn't ripple through `aion-audit` or `aion-config`.
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, key: &str) -> Result<String, SecretError> {
        let value = env::var(key).map_err(|_| SecretError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(SecretError::Empty(key.to_string()));
        }
        Ok(value)
    }
}
