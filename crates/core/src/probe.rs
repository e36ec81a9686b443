//! Environment probe phase.
//!
//! Looks up every catalogued tool on the context's search path and reports
//! its location and version. Probing has no side effects beyond recording
//! resolved paths in the [`ExecutionContext`].

use std::future::Future;

use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::subprocess::{self, QUICK_TIMEOUT};
use crate::tools::{parse_version, Tool, ToolStatus};

/// Capability for discovering installed tools.
pub trait ToolProbe: Send + Sync {
    /// Report whether `tool` is reachable through the context's search path.
    fn probe(
        &self,
        tool: Tool,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = ToolStatus> + Send;
}

/// Probe backed by a real `PATH` lookup and `--version` invocation.
pub struct SystemProbe;

impl ToolProbe for SystemProbe {
    async fn probe(&self, tool: Tool, ctx: &ExecutionContext) -> ToolStatus {
        let path = match which::which_in(tool.binary(), Some(ctx.search_path()), ctx.base_dir()) {
            Ok(path) => path,
            Err(_) => return ToolStatus::missing(tool),
        };

        let spec = ctx
            .command(&path)
            .arg("--version")
            .timeout(QUICK_TIMEOUT);
        let version = match subprocess::run_command(&spec).await {
            Ok(output) => parse_version(&output.combined()),
            Err(e) => {
                tracing::warn!(%tool, error = %e, "Version query failed");
                None
            }
        };

        ToolStatus {
            tool,
            path: Some(path),
            version,
        }
    }
}

/// Outcome of the probe phase.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub statuses: Vec<ToolStatus>,
}

impl ProbeReport {
    /// Tools that need provisioning, in catalogue order.
    pub fn missing(&self) -> Vec<Tool> {
        self.statuses
            .iter()
            .filter(|s| !s.is_present())
            .map(|s| s.tool)
            .collect()
    }
}

/// Probe all tools. A missing required tool aborts before anything else
/// runs, so the run performs no filesystem mutation in that case.
pub async fn probe_environment<P: ToolProbe>(
    probe: &P,
    ctx: &mut ExecutionContext,
) -> Result<ProbeReport, DeployError> {
    ctx.console.info("Checking environment prerequisites");
    let mut report = ProbeReport::default();

    for tool in Tool::ALL {
        let status = probe.probe(tool, ctx).await;
        match &status.path {
            Some(path) => {
                let version = status.version.as_deref().unwrap_or("unknown version");
                tracing::info!(%tool, path = %path.display(), version, "Tool found");
                ctx.console.success(format!("{tool} found ({version})"));
                ctx.record_tool(tool, path.clone());
            }
            None if tool.is_required() => {
                ctx.console.error(format!(
                    "{tool} is not installed. Install {tool} manually and re-run."
                ));
                return Err(DeployError::MissingInterpreter { tool });
            }
            None => {
                tracing::info!(%tool, "Tool missing, will provision");
                ctx.console.warn(format!("{tool} not found, it will be installed"));
            }
        }
        report.statuses.push(status);
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
