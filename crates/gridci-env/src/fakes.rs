//! In-memory fakes for the environment traits (testing only)
//!
//! Provides `MemoryRegistry`, `CountingBuilder`, and credential stubs that
//! satisfy the trait contracts without a network or a container runtime.

use crate::builder::ImageBuilder;
use crate::credentials::{Credential, CredentialProvider};
use crate::error::EnvError;
use crate::image::EnvironmentImage;
use crate::registry::ImageRegistry;
use async_trait::async_trait;
use chrono::Utc;
use gridci_core::{EnvironmentFingerprint, EnvironmentInputs, Prerequisite};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// In-memory image registry backed by a `HashMap<fingerprint, image>`.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    images: Mutex<HashMap<EnvironmentFingerprint, EnvironmentImage>>,
    fail_pulls: AtomicBool,
    pushes: AtomicU32,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an image directly, bypassing the push path.
    pub fn preload(&self, fingerprint: EnvironmentFingerprint, reference: &str) {
        let image = EnvironmentImage {
            fingerprint: fingerprint.clone(),
            reference: reference.to_string(),
            built_at: Utc::now(),
            size_bytes: Some(0),
        };
        self.images.lock().unwrap().insert(fingerprint, image);
    }

    /// Make every subsequent pull fail with a registry error.
    pub fn fail_pulls(&self) {
        self.fail_pulls.store(true, Ordering::SeqCst);
    }

    /// Number of successful pushes observed.
    pub fn push_count(&self) -> u32 {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn pull(
        &self,
        fingerprint: &EnvironmentFingerprint,
    ) -> Result<Option<EnvironmentImage>, EnvError> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(EnvError::RegistryUnreachable {
                url: "memory://registry".to_string(),
                detail: "injected pull failure".to_string(),
            });
        }
        Ok(self.images.lock().unwrap().get(fingerprint).cloned())
    }

    async fn push(&self, image: &EnvironmentImage, _auth: &Credential) -> Result<(), EnvError> {
        self.images
            .lock()
            .unwrap()
            .insert(image.fingerprint.clone(), image.clone());
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, fingerprint: &EnvironmentFingerprint) -> bool {
        self.images.lock().unwrap().contains_key(fingerprint)
    }
}

// ---------------------------------------------------------------------------
// CountingBuilder
// ---------------------------------------------------------------------------

/// Builder that records attempts and concurrency instead of building anything.
#[derive(Debug, Default)]
pub struct CountingBuilder {
    attempts: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl CountingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside each build, to widen concurrency windows.
    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
        self
    }

    /// Total build attempts, successful or not.
    pub fn build_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of builds observed running at the same time.
    pub fn max_concurrent_builds(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_builds(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn succeed_builds(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageBuilder for CountingBuilder {
    async fn build(
        &self,
        fingerprint: &EnvironmentFingerprint,
        _inputs: &EnvironmentInputs,
    ) -> Result<EnvironmentImage, EnvError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(EnvError::BuildFailed {
                fingerprint: fingerprint.to_string(),
                exit_code: 1,
                detail: "injected build failure".to_string(),
            });
        }

        Ok(EnvironmentImage {
            fingerprint: fingerprint.clone(),
            reference: format!("built:{}", fingerprint.short()),
            built_at: Utc::now(),
            size_bytes: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Credential stubs
// ---------------------------------------------------------------------------

/// Provider with no credentials at all.
#[derive(Debug, Default)]
pub struct NullCredentials;

#[async_trait]
impl CredentialProvider for NullCredentials {
    async fn get(&self, _prerequisite: &Prerequisite) -> Result<Option<Credential>, EnvError> {
        Ok(None)
    }
}

/// Provider holding only a registry push token.
#[derive(Debug, Default)]
pub struct StaticPushCredentials;

#[async_trait]
impl CredentialProvider for StaticPushCredentials {
    async fn get(&self, prerequisite: &Prerequisite) -> Result<Option<Credential>, EnvError> {
        match prerequisite {
            Prerequisite::RegistryPushCredential => {
                Ok(Some(Credential::new("registry-token", "fake-push-token")))
            }
            _ => Ok(None),
        }
    }
}
