//! Process supervisor capability.
//!
//! The orchestrator delegates running the application to an external
//! supervisor. [`ProcessSupervisor`] is the seam; [`pm2::Pm2Supervisor`]
//! drives the real pm2 CLI.

pub mod pm2;

use std::fmt;
use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::DeployError;

pub use pm2::Pm2Supervisor;

/// Lifecycle status as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Online,
    Launching,
    Stopping,
    Stopped,
    Errored,
    OneLaunchStatus,
    #[serde(untagged)]
    Other(String),
}

impl ProcessStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Online)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Launching => "launching",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
            Self::OneLaunchStatus => "one-launch-status",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One supervised process instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    /// Supervisor-assigned instance id.
    pub id: u32,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub restarts: u32,
}

/// Outcome of removing a previously supervised instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Removed,
    /// Nothing by that name was supervised; not an error.
    NotFound,
}

/// Operations the orchestrator needs from a process supervisor.
pub trait ProcessSupervisor: Send + Sync {
    /// Stop and forget every instance named `name`.
    fn delete(
        &self,
        name: &str,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StopOutcome, DeployError>> + Send;

    /// Start the apps declared in the descriptor at `descriptor`.
    fn start(
        &self,
        descriptor: &Path,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Snapshot of all supervised instances.
    fn list(
        &self,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<Vec<ProcessInfo>, DeployError>> + Send;

    /// Persist the current instance set so it survives supervisor restarts.
    fn save(&self, ctx: &ExecutionContext) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Register the supervisor to start on host boot.
    fn enable_on_boot(
        &self,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Operator commands printed after launch.
    fn management_commands(&self, name: &str) -> Vec<String>;

    /// Command showing the logs of `name`.
    fn logs_command(&self, name: &str) -> String;
}
