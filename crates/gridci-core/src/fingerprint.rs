//! Environment fingerprinting.
//!
//! A fingerprint is a SHA-256 digest over the ordered list of inputs that
//! determine an environment's contents: interpreter version, toolchain
//! version, os/arch, base layer revision, install script digests. Equal
//! ordered inputs always produce equal fingerprints; reordering or changing
//! any input produces a different fingerprint.

use crate::error::{MatrixError, MatrixResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ordered list of environment-defining inputs.
///
/// Order is semantic: `["3.11", "ubuntu-24.04"]` and `["ubuntu-24.04", "3.11"]`
/// identify different environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInputs(pub Vec<String>);

impl EnvironmentInputs {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(inputs.into_iter().map(Into::into).collect())
    }

    /// Append one input, preserving order.
    pub fn push(&mut self, input: impl Into<String>) {
        self.0.push(input.into());
    }

    /// Extend with the given inputs, preserving order.
    pub fn extended<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Content-addressed environment identifier (hex-encoded SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentFingerprint(String);

impl EnvironmentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and registry tags.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for EnvironmentFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint for an ordered input list.
///
/// Pure function: no filesystem or network access. Inputs are NUL-delimited
/// before hashing so that `["ab", "c"]` and `["a", "bc"]` digest differently.
/// An empty input list is malformed and fails with
/// [`MatrixError::InvalidEnvironmentSpec`].
pub fn fingerprint(inputs: &EnvironmentInputs) -> MatrixResult<EnvironmentFingerprint> {
    if inputs.is_empty() {
        return Err(MatrixError::InvalidEnvironmentSpec);
    }

    let mut hasher = Sha256::new();
    for input in &inputs.0 {
        hasher.update(input.as_bytes());
        hasher.update(b"\0");
    }
    Ok(EnvironmentFingerprint(hex::encode(hasher.finalize())))
}
