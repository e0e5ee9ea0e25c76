//! Credential Provider: produces short-lived SSH key material for a
//! `(user, access_token)` pair. Two backends, matching the pluggable
//! `ConsoleRedirectBackend`/`WebAuth` shape the auth backend enum uses
//! upstream: a remote key-signing service, and a static config map.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use model::{CredentialMaterial, ErrorKind, SecretString, Username};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("key service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("key service returned non-success status {0}")]
    UpstreamStatus(u16),
    #[error("no static key configured for user {0:?}")]
    NoStaticKey(Username),
    #[error("key service request timed out")]
    Timeout,
}

impl From<CredentialError> for ErrorKind {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::NoStaticKey(u) => {
                ErrorKind::CredentialMissing(format!("no key configured for {u}"))
            }
            CredentialError::Timeout => ErrorKind::Timeout("credential provider".into()),
            other => ErrorKind::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credential(
        &self,
        user: &Username,
        access_token: &str,
    ) -> Result<CredentialMaterial, CredentialError>;
}

/// Remote signing service variant. Mints a short-lived certificate-backed
/// key per call; never caches material across requests (credential material
/// is owned by the request that fetched it, per the data-model ownership
/// rule).
pub struct KeyServiceProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct KeyServiceResponse {
    private_key: String,
    public_cert: Option<String>,
    passphrase: Option<String>,
}

impl KeyServiceProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CredentialProvider for KeyServiceProvider {
    async fn get_credential(
        &self,
        user: &Username,
        access_token: &str,
    ) -> Result<CredentialMaterial, CredentialError> {
        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(format!("{}/keys", self.base_url))
                .bearer_auth(access_token)
                .json(&serde_json::json!({ "username": user.0 }))
                .send(),
        )
        .await
        .map_err(|_| CredentialError::Timeout)??;

        if !resp.status().is_success() {
            return Err(CredentialError::UpstreamStatus(resp.status().as_u16()));
        }
        let body: KeyServiceResponse = resp.json().await?;
        Ok(CredentialMaterial {
            private_key_pem: SecretString::new(body.private_key),
            public_certificate: body.public_cert,
            passphrase: body.passphrase.map(SecretString::new),
        })
    }
}

/// Static config map variant: `username -> {privateKey, publicCert?, passphrase?}`
/// loaded once from the `sshCredentials` config section.
pub struct StaticKeyProvider {
    keys: HashMap<Username, CredentialMaterial>,
}

impl StaticKeyProvider {
    pub fn new(keys: HashMap<Username, CredentialMaterial>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl CredentialProvider for StaticKeyProvider {
    async fn get_credential(
        &self,
        user: &Username,
        _access_token: &str,
    ) -> Result<CredentialMaterial, CredentialError> {
        self.keys
            .get(user)
            .cloned()
            .ok_or_else(|| CredentialError::NoStaticKey(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(key: &str) -> CredentialMaterial {
        CredentialMaterial {
            private_key_pem: SecretString::new(key),
            public_certificate: None,
            passphrase: None,
        }
    }

    #[tokio::test]
    async fn static_provider_returns_configured_key() {
        let mut keys = HashMap::new();
        keys.insert(Username::from("alice"), material("pem-alice"));
        let provider = StaticKeyProvider::new(keys);
        let cred = provider
            .get_credential(&Username::from("alice"), "tok")
            .await
            .unwrap();
        assert_eq!(cred.private_key_pem.expose(), "pem-alice");
    }

    #[tokio::test]
    async fn static_provider_rejects_unknown_user() {
        let provider = StaticKeyProvider::new(HashMap::new());
        let err = provider
            .get_credential(&Username::from("bob"), "tok")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NoStaticKey(_)));
    }
}
