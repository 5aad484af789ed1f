//! TOML matrix definition files.
//!
//! A matrix file declares axes, templates, run-level environment inputs, and
//! the registry/builder/runner settings. Validation happens at load so a
//! malformed file fails before anything is resolved or run.

use anyhow::{bail, Context, Result};
use gridci_core::{Axis, AxisSelection, JobKind, JobTemplate, Matrix, Prerequisite, TargetPlatform};
use gridci_env::{BuildConfig, RegistryConfig};
use gridci_exec::RunnerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// `[environment]` section.
#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentSection {
    /// Ordered run-level fingerprint inputs (base layer revision, install
    /// script digests).
    #[serde(default)]
    pub base_inputs: Vec<String>,
}

/// One `[[axis]]` entry.
#[derive(Debug, Deserialize)]
pub struct AxisSection {
    pub name: String,
    pub values: Vec<String>,
}

/// Axis selection in a template: the keyword `"all"` or an explicit list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SelectionValue {
    Keyword(String),
    Values(Vec<String>),
}

impl SelectionValue {
    fn into_selection(self, template: &str, axis: &str) -> Result<AxisSelection> {
        match self {
            SelectionValue::Keyword(word) if word == "all" => Ok(AxisSelection::All),
            SelectionValue::Keyword(word) => bail!(
                "template '{template}', axis '{axis}': expected \"all\" or a value list, got \"{word}\""
            ),
            SelectionValue::Values(values) => Ok(AxisSelection::Only(values)),
        }
    }
}

fn default_shards() -> u32 {
    1
}

/// One `[[template]]` entry.
#[derive(Debug, Deserialize)]
pub struct TemplateSection {
    pub name: String,
    #[serde(default)]
    pub axes: BTreeMap<String, SelectionValue>,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub kind: JobKind,
    pub command: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub requires: Vec<Prerequisite>,
    #[serde(default)]
    pub target: Option<TargetPlatform>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// `[run]` section.
#[derive(Debug, Deserialize)]
pub struct RunSection {
    #[serde(default = "RunSection::default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "RunSection::default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl RunSection {
    fn default_parallelism() -> usize {
        4
    }

    fn default_timeout_secs() -> u64 {
        600
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            parallelism: Self::default_parallelism(),
            default_timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// Raw file shape.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    environment: EnvironmentSection,
    #[serde(default, rename = "axis")]
    axes: Vec<AxisSection>,
    #[serde(default, rename = "template")]
    templates: Vec<TemplateSection>,
    #[serde(default)]
    run: RunSection,
    registry: Option<RegistryConfig>,
    builder: Option<BuildConfig>,
    runner: Option<RunnerConfig>,
}

/// A parsed and validated matrix definition.
#[derive(Debug)]
pub struct MatrixConfig {
    pub matrix: Matrix,
    pub base_inputs: Vec<String>,
    pub run: RunSection,
    pub registry: RegistryConfig,
    pub builder: BuildConfig,
    pub runner: RunnerConfig,
}

impl MatrixConfig {
    /// Load and validate a matrix definition file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read matrix file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid matrix file {}", path.display()))
    }

    /// Parse a matrix definition from TOML text.
    pub fn parse(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)?;

        let axes = file
            .axes
            .into_iter()
            .map(|axis| Axis::new(axis.name, axis.values))
            .collect();

        let mut templates = Vec::with_capacity(file.templates.len());
        for section in file.templates {
            let mut axes_map = BTreeMap::new();
            for (axis, selection) in section.axes {
                let selection = selection.into_selection(&section.name, &axis)?;
                axes_map.insert(axis, selection);
            }
            templates.push(JobTemplate {
                name: section.name,
                axes: axes_map,
                shards: section.shards,
                kind: section.kind,
                command: section.command,
                extra_args: section.extra_args,
                requires: section.requires,
                target: section.target,
                timeout_secs: section.timeout_secs,
            });
        }

        let matrix = Matrix::new(axes, templates);
        matrix.validate()?;

        Ok(Self {
            matrix,
            base_inputs: file.environment.base_inputs,
            run: file.run,
            registry: file.registry.unwrap_or_default(),
            builder: file.builder.unwrap_or_default(),
            runner: file.runner.unwrap_or_default(),
        })
    }
}
