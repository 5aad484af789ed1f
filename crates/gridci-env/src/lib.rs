//! Gridci Env - environment resolution layer
//!
//! Maps environment fingerprints to immutable, ready-to-use environment
//! images. Resolution prefers pulling a previously published image and falls
//! back to building fresh; concurrent resolutions of the same fingerprint
//! share a single in-flight build.

pub mod builder;
pub mod cache;
pub mod credentials;
pub mod error;
pub mod fakes;
pub mod image;
pub mod registry;

// Re-export key types
pub use builder::{BuildConfig, CommandImageBuilder, ImageBuilder};
pub use cache::{CacheMode, EnvironmentCache};
pub use credentials::{Credential, CredentialProvider, EnvCredentials, StaticCredentials};
pub use error::EnvError;
pub use image::{EnvironmentHandle, EnvironmentImage, ResolutionSource};
pub use registry::{HttpImageRegistry, ImageRegistry, RegistryConfig};

/// Result type for environment operations.
pub type Result<T> = std::result::Result<T, EnvError>;
