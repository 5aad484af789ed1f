//! Gridci Core - Matrix CI domain model
//!
//! Provides the pure, runtime-free half of gridci:
//! - Axes, job templates, and matrix validation
//! - Expansion of a matrix into an ordered list of concrete job specs
//! - Content-addressed environment fingerprints
//! - Job outcomes and the fail-closed verdict aggregation policy

pub mod error;
pub mod expand;
pub mod fingerprint;
pub mod job;
pub mod matrix;
pub mod outcome;
pub mod verdict;

// Re-export key types
pub use error::MatrixError;
pub use expand::expand;
pub use fingerprint::{fingerprint, EnvironmentFingerprint, EnvironmentInputs};
pub use job::{JobKind, JobSpec, Prerequisite, ShardSlot, TargetPlatform};
pub use matrix::{Axis, AxisSelection, JobTemplate, Matrix};
pub use outcome::{JobOutcome, JobReport};
pub use verdict::{aggregate, RunReport, Verdict};
