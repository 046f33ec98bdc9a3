//! Credentials for the hosted model endpoints
//!
//! Credentials are either fixed at construction time or fetched before each
//! request. Vertex AI access tokens expire after an hour, so the Vertex
//! providers usually run with [`gcloud_access_token`] as a dynamic source.
//!
//! ```ignore
//! let llm = AnthropicProvider::vertex("my-project", "us-east5", gcloud_access_token());
//! ```

use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Credentials for one API request
#[derive(Clone)]
pub struct AuthConfig {
    /// API key or OAuth access token
    pub api_key: String,
    /// Optional base URL overriding the provider's default endpoint
    pub base_url: Option<String>,
}

impl AuthConfig {
    /// Credentials with just a key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Credentials with a key and a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Some(base_url.into()),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Boxed future returned by auth providers
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthConfig>> + Send + 'a>>;

/// Source of fresh credentials, called before each API request
pub trait AuthProvider: Send + Sync {
    fn get_auth(&self) -> AuthFuture<'_>;
}

/// Wrapper to implement AuthProvider for async closures
pub struct FnAuthProvider<F> {
    func: F,
}

impl<F, Fut> AuthProvider for FnAuthProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuthConfig>> + Send + 'static,
{
    fn get_auth(&self) -> AuthFuture<'_> {
        Box::pin((self.func)())
    }
}

/// Create an auth provider from an async closure
pub fn auth_provider<F, Fut>(func: F) -> FnAuthProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuthConfig>> + Send + 'static,
{
    FnAuthProvider { func }
}

/// Fetch a Google Cloud access token with `gcloud auth print-access-token`
pub fn gcloud_access_token() -> impl AuthProvider {
    auth_provider(|| async {
        let output = tokio::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .context("Failed to run gcloud. Install the Google Cloud CLI or set VERTEX_ACCESS_TOKEN")?;

        if !output.status.success() {
            anyhow::bail!(
                "gcloud auth print-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let token = String::from_utf8(output.stdout)
            .context("gcloud returned a non UTF-8 token")?
            .trim()
            .to_string();

        Ok(AuthConfig::new(token))
    })
}

/// Either static credentials or a provider queried per request
pub(crate) enum AuthSource {
    Static(AuthConfig),
    Dynamic(Arc<dyn AuthProvider>),
}

impl Clone for AuthSource {
    fn clone(&self) -> Self {
        match self {
            AuthSource::Static(config) => AuthSource::Static(config.clone()),
            AuthSource::Dynamic(provider) => AuthSource::Dynamic(Arc::clone(provider)),
        }
    }
}

impl AuthSource {
    pub(crate) async fn get_auth(&self) -> Result<AuthConfig> {
        match self {
            AuthSource::Static(config) => Ok(config.clone()),
            AuthSource::Dynamic(provider) => provider.get_auth().await,
        }
    }
}
