use std::sync::Arc;

use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use sha2::Sha256;

use crate::error::{StorageError, StorageResult};
use crate::pipeline::Policy;
use crate::policies::{AnonymousCredentialPolicy, BearerTokenPolicy, StorageSharedKeyCredentialPolicy};

/// OAuth scope for Azure Storage data plane access.
pub const STORAGE_OAUTH_SCOPE: &str = "https://storage.azure.com/.default";

/// Environment variable holding the storage account name.
pub const ACCOUNT_NAME_ENV: &str = "AZURE_STORAGE_ACCOUNT_NAME";

/// Environment variable holding the base64 storage account key.
pub const ACCOUNT_KEY_ENV: &str = "AZURE_STORAGE_ACCOUNT_KEY";

/// Source of OAuth bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    async fn get_token(&self, scopes: &[&str]) -> StorageResult<SecretString>;
}

/// [`TokenProvider`] backed by any `azure_core` [`TokenCredential`].
#[derive(Debug, Clone)]
pub struct AzureTokenProvider {
    credential: Arc<dyn TokenCredential>,
}

impl AzureTokenProvider {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl TokenProvider for AzureTokenProvider {
    async fn get_token(&self, scopes: &[&str]) -> StorageResult<SecretString> {
        let token = self
            .credential
            .get_token(scopes, None)
            .await
            .map_err(|e| StorageError::Auth(format!("failed to acquire token: {e}")))?;
        Ok(SecretString::from(token.token.secret().to_string()))
    }
}

/// An account name paired with its decoded shared key.
pub struct StorageSharedKeyCredential {
    account_name: String,
    account_key: SecretBox<Vec<u8>>,
}

impl StorageSharedKeyCredential {
    /// Decode `account_key` (base64) for `account_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidAccountKey`] if the key is not valid base64.
    pub fn new(account_name: impl Into<String>, account_key: &str) -> StorageResult<Self> {
        let account_name = account_name.into();
        if account_name.is_empty() {
            return Err(StorageError::MissingConfig("account name must not be empty".into()));
        }
        let decoded = STANDARD.decode(account_key.trim()).map_err(|e| {
            StorageError::InvalidAccountKey(format!("account key is not valid base64: {e}"))
        })?;
        Ok(Self {
            account_name,
            account_key: SecretBox::new(Box::new(decoded)),
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key.
    pub fn compute_hmac_sha256(&self, string_to_sign: &str) -> StorageResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.account_key.expose_secret())
            .map_err(|e| StorageError::InvalidAccountKey(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for StorageSharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSharedKeyCredential")
            .field("account_name", &self.account_name)
            .field("account_key", &"****")
            .finish()
    }
}

/// Credential types supported by the storage pipeline.
#[derive(Clone)]
pub enum StorageCredential {
    /// No authorization; for public access or SAS-signed URLs.
    Anonymous,

    /// Shared Key authorization with the account key.
    SharedKey(Arc<StorageSharedKeyCredential>),

    /// Microsoft Entra ID bearer tokens.
    BearerToken(Arc<dyn TokenProvider>),
}

impl StorageCredential {
    /// Shared key credential from `AZURE_STORAGE_ACCOUNT_NAME` and
    /// `AZURE_STORAGE_ACCOUNT_KEY`. Falls back to anonymous access if either
    /// is unset or empty.
    pub fn from_env() -> StorageResult<Self> {
        let name = std::env::var(ACCOUNT_NAME_ENV).ok().filter(|v| !v.is_empty());
        let key = std::env::var(ACCOUNT_KEY_ENV).ok().filter(|v| !v.is_empty());
        match (name, key) {
            (Some(name), Some(key)) => Self::shared_key(name, &key),
            _ => {
                tracing::debug!("no account key in environment, using anonymous credential");
                Ok(Self::Anonymous)
            }
        }
    }

    /// Create a shared key credential.
    pub fn shared_key(account_name: impl Into<String>, account_key: &str) -> StorageResult<Self> {
        Ok(Self::SharedKey(Arc::new(StorageSharedKeyCredential::new(
            account_name,
            account_key,
        )?)))
    }

    /// Create a bearer token credential from any token provider.
    pub fn bearer_token(provider: Arc<dyn TokenProvider>) -> Self {
        Self::BearerToken(provider)
    }

    /// Create a bearer token credential from an `azure_core` credential.
    pub fn token_credential(credential: Arc<dyn TokenCredential>) -> Self {
        Self::BearerToken(Arc::new(AzureTokenProvider::new(credential)))
    }

    /// Create a bearer token credential using the Azure CLI login.
    pub fn azure_cli() -> StorageResult<Self> {
        let credential = azure_identity::AzureCliCredential::new(None)
            .map_err(|e| StorageError::Auth(format!("failed to create Azure CLI credential: {e}")))?;
        Ok(Self::token_credential(credential))
    }

    /// The signing policy for this credential.
    ///
    /// `audience` overrides the OAuth scopes requested by bearer credentials.
    pub fn create_policy(&self, audience: Option<Vec<String>>) -> Arc<dyn Policy> {
        match self {
            Self::Anonymous => Arc::new(AnonymousCredentialPolicy),
            Self::SharedKey(credential) => {
                Arc::new(StorageSharedKeyCredentialPolicy::new(Arc::clone(credential)))
            }
            Self::BearerToken(provider) => Arc::new(BearerTokenPolicy::new(
                Arc::clone(provider),
                audience
                    .filter(|scopes| !scopes.is_empty())
                    .unwrap_or_else(|| vec![STORAGE_OAUTH_SCOPE.to_string()]),
            )),
        }
    }
}

impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "StorageCredential::Anonymous"),
            Self::SharedKey(c) => write!(f, "StorageCredential::SharedKey({}:****)", c.account_name()),
            Self::BearerToken(_) => write!(f, "StorageCredential::BearerToken(****)"),
        }
    }
}
