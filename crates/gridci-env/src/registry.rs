//! Image registry client.
//!
//! The registry stores environment images addressed by fingerprint. Pull has
//! "present or clean miss" semantics: a missing key is `Ok(None)`, never a
//! partial image. Publication is atomic on the server side; the client only
//! uploads a manifest once the image it describes is fully available.

use crate::credentials::Credential;
use crate::error::EnvError;
use crate::image::EnvironmentImage;
use async_trait::async_trait;
use gridci_core::EnvironmentFingerprint;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Push/pull target for environment images.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetch the image published under `fingerprint`, or `None` on a clean miss.
    async fn pull(
        &self,
        fingerprint: &EnvironmentFingerprint,
    ) -> Result<Option<EnvironmentImage>, EnvError>;

    /// Publish an image under its fingerprint. Atomic: concurrent pulls see
    /// either the complete image or a miss, never a partial upload.
    async fn push(&self, image: &EnvironmentImage, auth: &Credential) -> Result<(), EnvError>;

    /// Cheap presence probe, used for diagnostics and cache warmup decisions.
    async fn exists(&self, fingerprint: &EnvironmentFingerprint) -> bool;
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry server URL.
    pub base_url: String,

    /// Repository (namespace) images are published under.
    pub repository: String,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            base_url: std::env::var("GRIDCI_REGISTRY_URL")
                .unwrap_or_else(|_| "https://registry.gridci.dev".to_string()),
            repository: std::env::var("GRIDCI_REGISTRY_REPO")
                .unwrap_or_else(|_| "gridci/environments".to_string()),
            user_agent: format!("gridci/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(base_url: &str, repository: &str) -> Self {
        RegistryConfig {
            base_url: base_url.to_string(),
            repository: repository.to_string(),
            ..Default::default()
        }
    }
}

/// HTTP manifest-based registry client.
pub struct HttpImageRegistry {
    config: RegistryConfig,
    http_client: reqwest::Client,
}

impl HttpImageRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, EnvError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EnvError::RegistryUnreachable {
                url: config.base_url.clone(),
                detail: e.to_string(),
            })?;

        Ok(HttpImageRegistry {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, EnvError> {
        Self::new(RegistryConfig::from_env())
    }

    fn manifest_url(&self, fingerprint: &EnvironmentFingerprint) -> String {
        format!(
            "{}/{}/manifests/{}",
            self.config.base_url, self.config.repository, fingerprint
        )
    }
}

#[async_trait]
impl ImageRegistry for HttpImageRegistry {
    async fn pull(
        &self,
        fingerprint: &EnvironmentFingerprint,
    ) -> Result<Option<EnvironmentImage>, EnvError> {
        let url = self.manifest_url(fingerprint);
        debug!(fingerprint = %fingerprint.short(), "pulling environment manifest");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            EnvError::RegistryUnreachable {
                url: self.config.base_url.clone(),
                detail: e.to_string(),
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(fingerprint = %fingerprint.short(), "cache miss");
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(EnvError::PullFailed {
                fingerprint: fingerprint.to_string(),
                detail: format!("registry returned {}", response.status()),
            });
        }

        let image: EnvironmentImage =
            response
                .json()
                .await
                .map_err(|e| EnvError::PullFailed {
                    fingerprint: fingerprint.to_string(),
                    detail: format!("malformed manifest: {e}"),
                })?;

        if &image.fingerprint != fingerprint {
            // A manifest published under the wrong key is treated as corrupt,
            // not as a usable image.
            return Err(EnvError::PullFailed {
                fingerprint: fingerprint.to_string(),
                detail: format!("manifest fingerprint mismatch: {}", image.fingerprint),
            });
        }

        Ok(Some(image))
    }

    async fn push(&self, image: &EnvironmentImage, auth: &Credential) -> Result<(), EnvError> {
        let url = self.manifest_url(&image.fingerprint);
        debug!(fingerprint = %image.fingerprint.short(), "publishing environment manifest");

        let response = self
            .http_client
            .put(&url)
            .bearer_auth(&auth.secret)
            .json(image)
            .send()
            .await
            .map_err(|e| EnvError::RegistryUnreachable {
                url: self.config.base_url.clone(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EnvError::PushFailed {
                fingerprint: image.fingerprint.to_string(),
                detail: format!("registry returned {}", response.status()),
            });
        }

        Ok(())
    }

    async fn exists(&self, fingerprint: &EnvironmentFingerprint) -> bool {
        let url = self.manifest_url(fingerprint);
        match self.http_client.head(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(fingerprint = %fingerprint.short(), error = %e, "registry probe failed");
                false
            }
        }
    }
}
