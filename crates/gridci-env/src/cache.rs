//! Content-addressed environment cache with single-flight resolution.
//!
//! The cache is the one shared-mutation point of a run. Concurrent
//! resolutions of the same fingerprint serialize on a keyed slot (at most one
//! construction in flight per key, later callers await the first caller's
//! result); distinct fingerprints resolve fully in parallel.

use crate::builder::ImageBuilder;
use crate::credentials::CredentialProvider;
use crate::error::EnvError;
use crate::image::{EnvironmentHandle, EnvironmentImage, ResolutionSource};
use crate::registry::ImageRegistry;
use gridci_core::{EnvironmentFingerprint, EnvironmentInputs, Prerequisite};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Pull a published image when present; build (and publish) on a miss.
    PreferPull,

    /// Skip the pull and always construct fresh, publishing the result.
    /// Used by scheduled cache-refresh runs.
    ForceBuild,
}

#[derive(Debug, Clone)]
struct ResolvedEnv {
    image: EnvironmentImage,
    source: ResolutionSource,
}

/// Keyed slot: registration and lookup happen atomically under the map lock,
/// initialization is serialized by the `OnceCell`.
type Slot = Arc<OnceCell<ResolvedEnv>>;

/// Maps fingerprints to ready environments, building at most once per key.
pub struct EnvironmentCache {
    registry: Arc<dyn ImageRegistry>,
    builder: Arc<dyn ImageBuilder>,
    credentials: Arc<dyn CredentialProvider>,
    slots: Mutex<HashMap<EnvironmentFingerprint, Slot>>,
}

impl EnvironmentCache {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        builder: Arc<dyn ImageBuilder>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            registry,
            builder,
            credentials,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a fingerprint to a ready-to-use environment.
    ///
    /// Idempotent: callers arriving while a resolution for the same
    /// fingerprint is in flight await its result instead of triggering a
    /// duplicate build. A failed resolution leaves its slot uninitialized, so
    /// a later call retries the build on the same serialized slot; failures
    /// stay local to the fingerprint.
    pub async fn resolve(
        &self,
        fingerprint: &EnvironmentFingerprint,
        inputs: &EnvironmentInputs,
        mode: CacheMode,
    ) -> Result<EnvironmentHandle, EnvError> {
        let slot = self.slot_for(fingerprint, mode).await;

        let resolved = slot
            .get_or_try_init(|| self.resolve_uncached(fingerprint, inputs, mode))
            .await?;

        Ok(EnvironmentHandle::new(
            resolved.image.clone(),
            resolved.source,
        ))
    }

    /// Mark a cached entry for rebuild on next resolution.
    ///
    /// Environments already resolved and in use keep their handles; a
    /// resolution still in flight is left alone (its result is current by
    /// definition).
    pub async fn invalidate(&self, fingerprint: &EnvironmentFingerprint) {
        let mut slots = self.slots.lock().await;
        if slots.get(fingerprint).is_some_and(|slot| slot.initialized()) {
            slots.remove(fingerprint);
            debug!(fingerprint = %fingerprint.short(), "cache entry invalidated");
        }
    }

    async fn slot_for(&self, fingerprint: &EnvironmentFingerprint, mode: CacheMode) -> Slot {
        let mut slots = self.slots.lock().await;
        if mode == CacheMode::ForceBuild {
            // Drop a completed entry so this resolution constructs fresh. An
            // in-flight entry is joined instead: at most one construction per
            // key takes precedence over rebuilding, and the next scheduled
            // refresh will rebuild.
            if slots.get(fingerprint).is_some_and(|slot| slot.initialized()) {
                slots.remove(fingerprint);
            }
        }
        Arc::clone(slots.entry(fingerprint.clone()).or_default())
    }

    async fn resolve_uncached(
        &self,
        fingerprint: &EnvironmentFingerprint,
        inputs: &EnvironmentInputs,
        mode: CacheMode,
    ) -> Result<ResolvedEnv, EnvError> {
        let pull_error = match mode {
            CacheMode::ForceBuild => "not attempted (forced build)".to_string(),
            CacheMode::PreferPull => match self.registry.pull(fingerprint).await {
                Ok(Some(image)) => {
                    info!(fingerprint = %fingerprint.short(), "environment cache hit");
                    return Ok(ResolvedEnv {
                        image,
                        source: ResolutionSource::Pulled,
                    });
                }
                Ok(None) => "cache miss".to_string(),
                Err(err) => {
                    // A broken registry degrades to the build path.
                    warn!(fingerprint = %fingerprint.short(), error = %err, "pull failed, building instead");
                    err.to_string()
                }
            },
        };

        let image = match self.builder.build(fingerprint, inputs).await {
            Ok(image) => image,
            Err(build_err) => {
                return Err(EnvError::EnvironmentUnavailable {
                    fingerprint: fingerprint.to_string(),
                    pull_error,
                    build_error: build_err.to_string(),
                });
            }
        };

        self.publish(&image).await;

        Ok(ResolvedEnv {
            image,
            source: ResolutionSource::Built,
        })
    }

    /// Publish a freshly built image for future reuse.
    ///
    /// Publication is an optimization for later runs, not a correctness
    /// requirement of this one: a missing push credential or a failed push
    /// degrades to a log line and the handle is still returned.
    async fn publish(&self, image: &EnvironmentImage) {
        let credential = match self
            .credentials
            .get(&Prerequisite::RegistryPushCredential)
            .await
        {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!(
                    fingerprint = %image.fingerprint.short(),
                    "no push credential, skipping publish"
                );
                return;
            }
            Err(err) => {
                warn!(fingerprint = %image.fingerprint.short(), error = %err, "credential lookup failed, skipping publish");
                return;
            }
        };

        match self.registry.push(image, &credential).await {
            Ok(()) => {
                info!(fingerprint = %image.fingerprint.short(), "environment published");
            }
            Err(err) => {
                warn!(fingerprint = %image.fingerprint.short(), error = %err, "publish failed");
            }
        }
    }
}
