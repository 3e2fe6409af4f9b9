//! Secret resolution
//!
//! Steps declare secret names; values are requested from an external store
//! at invocation time, injected into the child environment, and redacted
//! from captured output. They are never logged or persisted.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret '{0}' is not available")]
    NotFound(String),
}

/// External secret/credential store, invoked at step-invocation time
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<String, SecretError>;
}

/// Resolves secrets from process environment variables prefixed with
/// `CONVEYOR_SECRET_`.
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self {
            prefix: "CONVEYOR_SECRET_".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(format!("{}{}", self.prefix, name))
            .map_err(|_| SecretError::NotFound(name.to_string()))
    }
}

/// Fixed in-memory secrets, for tests and ephemeral runs
pub struct StaticSecretProvider {
    values: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let mut values = HashMap::new();
        values.insert("REGISTRY_PASSWORD".to_string(), "hunter2".to_string());
        let provider = StaticSecretProvider::new(values);

        assert_eq!(provider.resolve("REGISTRY_PASSWORD").await.unwrap(), "hunter2");
        assert_eq!(
            provider.resolve("MISSING").await.unwrap_err(),
            SecretError::NotFound("MISSING".to_string())
        );
    }

    #[tokio::test]
    async fn test_env_provider_prefix() {
        std::env::set_var("TEST_CONVEYOR_PREFIX_TOKEN", "abc123");
        let provider = EnvSecretProvider::with_prefix("TEST_CONVEYOR_PREFIX_");
        assert_eq!(provider.resolve("TOKEN").await.unwrap(), "abc123");
        std::env::remove_var("TEST_CONVEYOR_PREFIX_TOKEN");
    }
}
