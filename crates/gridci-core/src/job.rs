//! Concrete job specifications produced by matrix expansion.

use crate::fingerprint::{EnvironmentFingerprint, EnvironmentInputs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One of N equal partitions of a job's workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSlot {
    /// 1-based shard index, `1 <= index <= count`.
    pub index: u32,

    /// Total shard count, >= 2 (unsharded jobs carry no slot).
    pub count: u32,
}

impl std::fmt::Display for ShardSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

/// External capability a job needs before it can run.
///
/// An unsatisfiable prerequisite degrades the job to `Skipped`, never to a
/// crash of the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prerequisite {
    /// SSH key for VCS-over-SSH access.
    SshCredential,

    /// Token authorizing image registry publication.
    RegistryPushCredential,

    /// Project-specific named credential.
    Credential(String),
}

impl std::fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prerequisite::SshCredential => write!(f, "ssh_credential"),
            Prerequisite::RegistryPushCredential => write!(f, "registry_push_credential"),
            Prerequisite::Credential(name) => write!(f, "credential({name})"),
        }
    }
}

/// What a job's payload does when executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run the command and judge it by exit status.
    #[default]
    Command,

    /// Run the command as a platform probe and parse its stdout into a
    /// platform descriptor artifact.
    PlatformProbe,
}

/// An execution platform, used to detect foreign-architecture targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetPlatform {
    /// Operating system identifier (e.g. "linux").
    pub os: String,

    /// Machine architecture (e.g. "x86_64", "aarch64").
    pub arch: String,
}

impl TargetPlatform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform the current process runs on.
    pub fn host() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Whether this target matches `host` natively.
    pub fn is_native(&self, host: &TargetPlatform) -> bool {
        self.os == host.os && self.arch == host.arch
    }
}

impl std::fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// One fully-resolved point in the matrix.
///
/// Immutable once created by the expander; consumed exactly once by the
/// runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable job id: template name, axis values, shard slot.
    pub id: String,

    /// Source template name.
    pub template: String,

    /// Concrete axis value assignment.
    pub axis_values: BTreeMap<String, String>,

    /// Shard descriptor, present only when the template declared shards > 1.
    pub shard: Option<ShardSlot>,

    /// Resolved environment fingerprint.
    pub fingerprint: EnvironmentFingerprint,

    /// Ordered inputs the fingerprint was derived from, needed again when the
    /// environment has to be built rather than pulled.
    pub env_inputs: EnvironmentInputs,

    /// What the payload produces.
    pub kind: JobKind,

    /// Full command payload (executable + arguments, shard args included).
    pub command: Vec<String>,

    /// Prerequisites checked by the runner before spawning.
    pub requires: Vec<Prerequisite>,

    /// Foreign target platform, when the job runs under emulation.
    pub target: Option<TargetPlatform>,

    /// Per-job timeout in seconds, when the template overrides the default.
    pub timeout_secs: Option<u64>,
}

impl JobSpec {
    /// Format a job id from its coordinates.
    pub(crate) fn format_id(
        template: &str,
        axis_values: &BTreeMap<String, String>,
        shard: Option<ShardSlot>,
    ) -> String {
        let mut id = template.to_string();
        for (axis, value) in axis_values {
            id.push_str(&format!("-{axis}={value}"));
        }
        if let Some(slot) = shard {
            id.push_str(&format!("-shard{}of{}", slot.index, slot.count));
        }
        id
    }
}
