//! Provisioning phase: install tools the probe reported missing.
//!
//! Each missing tool gets one install attempt, a re-probe, and a check of
//! its known fallback install locations. A tool that is still absent after
//! that is a hard stop; there is no retry loop.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::probe::ToolProbe;
use crate::subprocess::{self, CommandSpec};
use crate::tools::{InstallStep, Tool, ToolStatus};

/// Capability for installing a missing tool.
pub trait Installable: Send + Sync {
    fn install(
        &self,
        tool: Tool,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;
}

/// Installer running each tool's canonical recipe on the host.
pub struct SystemInstaller {
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl SystemInstaller {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn fetch_script(&self, tool: Tool, url: &str) -> Result<Vec<u8>, DeployError> {
        let failed = |e: reqwest::Error| DeployError::InstallFailed {
            tool,
            reason: format!("download of {url} failed: {e}"),
        };
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;
        let body = response.bytes().await.map_err(failed)?;
        Ok(body.to_vec())
    }

    fn step_command(&self, step: &InstallStep, ctx: &ExecutionContext) -> CommandSpec {
        let (program, args, elevated): (&str, &[&str], bool) = match step {
            InstallStep::FetchAndRun { shell, elevated, .. } => (*shell, &["-s"][..], *elevated),
            InstallStep::Run {
                program,
                args,
                elevated,
            } => (*program, *args, *elevated),
        };
        let spec = if elevated {
            ctx.elevated_command(program)
        } else {
            ctx.command(program)
        };
        spec.args(args.iter().copied()).timeout(self.timeout)
    }
}

impl Installable for SystemInstaller {
    async fn install(&self, tool: Tool, ctx: &ExecutionContext) -> Result<(), DeployError> {
        let recipe = tool
            .install_recipe()
            .ok_or(DeployError::MissingInterpreter { tool })?;

        for step in &recipe {
            let mut spec = self.step_command(step, ctx);
            if let InstallStep::FetchAndRun { url, .. } = step {
                tracing::info!(%tool, url, "Downloading installer script");
                spec = spec.stdin(self.fetch_script(tool, url).await?);
            }

            tracing::info!(%tool, command = %spec.display(), "Running install step");
            let output = subprocess::run_command(&spec).await?;
            if !output.success() {
                return Err(DeployError::InstallFailed {
                    tool,
                    reason: format!(
                        "`{}` exited with {}: {}",
                        spec.display(),
                        output.exit_code,
                        output.combined()
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Install every tool in `missing`, confirming each one afterwards.
pub async fn provision_missing<P, I>(
    probe: &P,
    installer: &I,
    ctx: &mut ExecutionContext,
    missing: &[Tool],
) -> Result<Vec<ToolStatus>, DeployError>
where
    P: ToolProbe,
    I: Installable,
{
    let mut installed = Vec::with_capacity(missing.len());

    for &tool in missing {
        ctx.console.info(format!("Installing {tool}..."));
        if let Err(e) = installer.install(tool, ctx).await {
            ctx.console.error(format!("{tool} installation failed: {e}"));
            return Err(e);
        }

        let status = confirm_installed(probe, ctx, tool).await;
        let Some(path) = status.path.clone() else {
            ctx.console.error(format!(
                "{tool} is still unavailable after installation; install it manually and re-run"
            ));
            return Err(DeployError::ProvisioningFailed { tool });
        };

        ctx.record_tool(tool, path);
        ctx.console.success(format!(
            "{tool} installed ({})",
            status.version.as_deref().unwrap_or("unknown version")
        ));
        installed.push(status);
    }

    Ok(installed)
}

/// Re-probe `tool`; if the installer put it somewhere not yet on the search
/// path, pick it up from its fallback locations.
async fn confirm_installed<P: ToolProbe>(
    probe: &P,
    ctx: &mut ExecutionContext,
    tool: Tool,
) -> ToolStatus {
    let status = probe.probe(tool, ctx).await;
    if status.is_present() {
        return status;
    }

    let fallback = tool
        .fallback_paths(ctx.home.as_deref())
        .into_iter()
        .find(|p| is_executable(p));

    match fallback.as_deref().and_then(Path::parent) {
        Some(dir) => {
            tracing::info!(%tool, dir = %dir.display(), "Using fallback install location");
            ctx.extend_search_path(dir);
            probe.probe(tool, ctx).await
        }
        None => status,
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
