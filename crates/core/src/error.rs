use std::path::PathBuf;

use crate::subprocess::CommandError;
use crate::tools::Tool;

/// Every way a deploy run can stop short of a verified healthy launch.
///
/// All variants are fatal for the invocation; recovery is a manual re-run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{tool} is required but was not found; install it manually and re-run")]
    MissingInterpreter { tool: Tool },

    #[error("Failed to install {tool}: {reason}")]
    InstallFailed { tool: Tool, reason: String },

    #[error("{tool} is still unavailable after installation")]
    ProvisioningFailed { tool: Tool },

    #[error("Workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dependency sync failed: {0}")]
    DependencySync(String),

    #[error("Process descriptor error: {0}")]
    Descriptor(String),

    #[error("Supervisor command `{command}` failed: {message}")]
    Supervisor { command: String, message: String },

    #[error("Process '{name}' is not healthy after launch (status: {status})")]
    Unhealthy { name: String, status: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl DeployError {
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Process exit status reported for this failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
