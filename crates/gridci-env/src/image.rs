//! Environment images and resolution handles.

use chrono::{DateTime, Utc};
use gridci_core::EnvironmentFingerprint;
use serde::{Deserialize, Serialize};

/// An immutable, built environment artifact keyed by fingerprint.
///
/// Never mutated after creation. The registry may expire entries under an
/// external retention policy, but an entry is never silently replaced for
/// the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentImage {
    pub fingerprint: EnvironmentFingerprint,

    /// Registry reference or local store path the runtime launches from.
    pub reference: String,

    pub built_at: DateTime<Utc>,

    /// Compressed size when known (pulled images report it, fresh builds may not).
    pub size_bytes: Option<u64>,
}

/// How a handle's image was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Reused from the registry.
    Pulled,

    /// Constructed fresh during this resolution.
    Built,
}

/// A ready-to-use environment handed to the job runner.
///
/// Cheap to clone; handles stay valid even if the cache entry is later
/// invalidated.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    image: EnvironmentImage,
    source: ResolutionSource,
}

impl EnvironmentHandle {
    pub fn new(image: EnvironmentImage, source: ResolutionSource) -> Self {
        Self { image, source }
    }

    pub fn image(&self) -> &EnvironmentImage {
        &self.image
    }

    pub fn fingerprint(&self) -> &EnvironmentFingerprint {
        &self.image.fingerprint
    }

    pub fn reference(&self) -> &str {
        &self.image.reference
    }

    pub fn source(&self) -> ResolutionSource {
        self.source
    }

    /// True when the image was reused rather than built.
    pub fn was_cache_hit(&self) -> bool {
        self.source == ResolutionSource::Pulled
    }
}
