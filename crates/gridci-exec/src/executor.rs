//! Execution strategy selection: native vs emulated.
//!
//! Foreign-architecture jobs run under a process emulation shim layered
//! beneath the normal container execution path. The strategy is a plain
//! enum selected by target architecture.

use gridci_core::TargetPlatform;
use serde::{Deserialize, Serialize};

/// Emulated jobs are slower and more failure-prone; their timeouts are
/// stretched by this factor.
const EMULATION_TIMEOUT_FACTOR: u32 = 5;

/// How a job's command is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    /// Direct execution on the host architecture.
    Native,

    /// Execution through a foreign-architecture emulation shim.
    Emulated { emulator: String },
}

impl Executor {
    /// Pick the strategy for `target` on `host`. No target, or a target
    /// matching the host, runs natively.
    pub fn for_target(host: &TargetPlatform, target: Option<&TargetPlatform>) -> Self {
        match target {
            Some(target) if !target.is_native(host) => Executor::Emulated {
                emulator: format!("qemu-{}", target.arch),
            },
            _ => Executor::Native,
        }
    }

    /// Wrap a command into the argv actually executed.
    pub fn wrap(&self, command: &[String]) -> Vec<String> {
        match self {
            Executor::Native => command.to_vec(),
            Executor::Emulated { emulator } => {
                let mut argv = Vec::with_capacity(command.len() + 1);
                argv.push(emulator.clone());
                argv.extend_from_slice(command);
                argv
            }
        }
    }

    /// Timeout multiplier callers apply to per-job deadlines.
    pub fn timeout_factor(&self) -> u32 {
        match self {
            Executor::Native => 1,
            Executor::Emulated { .. } => EMULATION_TIMEOUT_FACTOR,
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self, Executor::Emulated { .. })
    }
}
