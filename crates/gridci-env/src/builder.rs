//! Environment image construction.
//!
//! Building is the expensive, failure-prone path: it fetches base layers over
//! the network and compiles native extensions. The builder shells out to a
//! configured image-build command and enforces a wall-clock timeout.

use crate::error::EnvError;
use crate::image::EnvironmentImage;
use async_trait::async_trait;
use chrono::Utc;
use gridci_core::{EnvironmentFingerprint, EnvironmentInputs};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Constructs a fresh environment image for a fingerprint.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(
        &self,
        fingerprint: &EnvironmentFingerprint,
        inputs: &EnvironmentInputs,
    ) -> Result<EnvironmentImage, EnvError>;
}

/// Builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build command prefix (e.g. `["docker", "buildx", "build"]`).
    pub command: Vec<String>,

    /// Tag prefix for built images; the fingerprint short form is appended.
    pub reference_prefix: String,

    /// Wall-clock build timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            command: vec!["docker".to_string(), "build".to_string(), ".".to_string()],
            reference_prefix: "gridci/env".to_string(),
            // Builds fetch base layers and compile native extensions; keep the
            // ceiling generous but bounded so a wedged build cannot stall a run.
            timeout_secs: 1800,
        }
    }
}

/// Shells out to an image-build command.
pub struct CommandImageBuilder {
    config: BuildConfig,
}

impl CommandImageBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    fn reference_for(&self, fingerprint: &EnvironmentFingerprint) -> String {
        format!("{}:{}", self.config.reference_prefix, fingerprint.short())
    }
}

#[async_trait]
impl ImageBuilder for CommandImageBuilder {
    async fn build(
        &self,
        fingerprint: &EnvironmentFingerprint,
        inputs: &EnvironmentInputs,
    ) -> Result<EnvironmentImage, EnvError> {
        let reference = self.reference_for(fingerprint);
        info!(fingerprint = %fingerprint.short(), reference = %reference, "building environment");

        let (exe, prefix_args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| EnvError::BuildFailed {
                fingerprint: fingerprint.to_string(),
                exit_code: -1,
                detail: "empty build command".to_string(),
            })?;

        let mut command = Command::new(exe);
        command
            .args(prefix_args)
            .arg("--tag")
            .arg(&reference)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for input in &inputs.0 {
            command.arg("--build-arg").arg(input);
        }

        let child = command.spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| EnvError::BuildTimeout {
            fingerprint: fingerprint.to_string(),
            timeout_secs: self.config.timeout_secs,
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnvError::BuildFailed {
                fingerprint: fingerprint.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                detail: stderr.trim().to_string(),
            });
        }

        debug!(fingerprint = %fingerprint.short(), "environment build finished");
        Ok(EnvironmentImage {
            fingerprint: fingerprint.clone(),
            reference,
            built_at: Utc::now(),
            size_bytes: None,
        })
    }
}
