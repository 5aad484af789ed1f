//! Matrix definition: axes, templates, and validation.

use crate::error::{MatrixError, MatrixResult};
use crate::job::{JobKind, Prerequisite, TargetPlatform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A named dimension of variation with an ordered set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis name, unique within a matrix (e.g. "interpreter", "os").
    pub name: String,

    /// Ordered values for this axis.
    pub values: Vec<String>,
}

impl Axis {
    pub fn new<S, I, V>(name: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// How a template selects values from one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSelection {
    /// Vary over every declared value of the axis.
    All,

    /// Restrict to the listed values (intersected with the axis declaration).
    ///
    /// An intersection that comes up empty yields zero jobs for the template,
    /// which is the supported way to express "this combination does not run
    /// on this platform".
    Only(Vec<String>),
}

impl AxisSelection {
    /// Resolve against the declared axis values, preserving declaration order.
    pub fn resolve<'a>(&self, axis: &'a Axis) -> Vec<&'a str> {
        match self {
            AxisSelection::All => axis.values.iter().map(String::as_str).collect(),
            AxisSelection::Only(subset) => axis
                .values
                .iter()
                .filter(|v| subset.contains(v))
                .map(String::as_str)
                .collect(),
        }
    }
}

/// A cross-product specification over a subset of axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Template name, used as the job id prefix.
    pub name: String,

    /// Selected axes. BTreeMap keeps expansion in lexicographic axis order.
    pub axes: BTreeMap<String, AxisSelection>,

    /// Number of shards per axis combination (1 = unsharded).
    pub shards: u32,

    /// What the payload produces.
    pub kind: JobKind,

    /// Command executed inside the environment (first element is executable).
    pub command: Vec<String>,

    /// Extra arguments appended after shard arguments.
    pub extra_args: Vec<String>,

    /// Prerequisites that must be satisfiable for the job to run.
    pub requires: Vec<Prerequisite>,

    /// Foreign target platform, for jobs run under emulation.
    pub target: Option<TargetPlatform>,

    /// Per-job timeout in seconds (overrides the run default when set).
    pub timeout_secs: Option<u64>,
}

impl JobTemplate {
    /// Create an unsharded template varying over all values of `axes`.
    pub fn new<S: Into<String>>(name: S, axis_names: &[&str], command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            axes: axis_names
                .iter()
                .map(|a| (a.to_string(), AxisSelection::All))
                .collect(),
            shards: 1,
            kind: JobKind::Command,
            command,
            extra_args: Vec::new(),
            requires: Vec::new(),
            target: None,
            timeout_secs: None,
        }
    }

    /// Pin one axis to a value subset.
    pub fn with_axis<S: Into<String>>(mut self, axis: S, selection: AxisSelection) -> Self {
        self.axes.insert(axis.into(), selection);
        self
    }

    /// Shard each axis combination into `shards` parts.
    pub fn with_shards(mut self, shards: u32) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_requires(mut self, requires: Vec<Prerequisite>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_target(mut self, target: TargetPlatform) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// A complete matrix: declared axes plus the templates expanded over them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    pub axes: Vec<Axis>,
    pub templates: Vec<JobTemplate>,
}

impl Matrix {
    pub fn new(axes: Vec<Axis>, templates: Vec<JobTemplate>) -> Self {
        Self { axes, templates }
    }

    /// Look up a declared axis by name.
    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Validate the matrix invariants.
    ///
    /// Checked before any job runs:
    /// - every axis has at least one value
    /// - axis names are unique
    /// - templates only select declared axes
    /// - shard counts are >= 1
    pub fn validate(&self) -> MatrixResult<()> {
        let mut seen = HashSet::new();
        for axis in &self.axes {
            if axis.values.is_empty() {
                return Err(MatrixError::EmptyAxis {
                    axis: axis.name.clone(),
                });
            }
            if !seen.insert(axis.name.as_str()) {
                return Err(MatrixError::DuplicateAxis {
                    axis: axis.name.clone(),
                });
            }
        }

        for template in &self.templates {
            if template.shards == 0 {
                return Err(MatrixError::InvalidShardCount {
                    template: template.name.clone(),
                    shards: template.shards,
                });
            }
            for axis_name in template.axes.keys() {
                if self.axis(axis_name).is_none() {
                    return Err(MatrixError::UnknownAxis {
                        template: template.name.clone(),
                        axis: axis_name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
