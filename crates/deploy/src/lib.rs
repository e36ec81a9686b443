//! `cytodeploy` library crate.
//!
//! Wires the host-backed capabilities into the deploy pipeline. The binary
//! entrypoint lives in `main.rs`; integration tests drive [`execute`] with
//! fakes instead.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use cytodeploy_core::config::DeployConfig;
use cytodeploy_core::console::Console;
use cytodeploy_core::context::ExecutionContext;
use cytodeploy_core::layout::{self, AppLayout};
use cytodeploy_core::pipeline::{Capabilities, DeployReport, PhaseError, Pipeline};
use cytodeploy_core::probe::{SystemProbe, ToolProbe};
use cytodeploy_core::provision::{Installable, SystemInstaller};
use cytodeploy_core::supervisor::{Pm2Supervisor, ProcessSupervisor};
use cytodeploy_core::workspace::{DependencyManager, UvEnvironment};

pub type SystemPipeline = Pipeline<SystemProbe, SystemInstaller, UvEnvironment, Pm2Supervisor>;

/// Pipeline backed by the real host: `PATH` lookups, installer scripts,
/// `uv` and pm2.
pub fn system_pipeline(config: DeployConfig) -> SystemPipeline {
    let caps = Capabilities {
        probe: SystemProbe,
        installer: SystemInstaller::new(config.install_timeout()),
        deps: UvEnvironment::new(config.install_timeout()),
        supervisor: Pm2Supervisor,
    };
    Pipeline::new(config, caps)
}

/// Application root for this run: `APP_DIR` when set, otherwise the
/// checkout the executable lives in.
pub fn resolve_base_dir(config: &DeployConfig) -> anyhow::Result<PathBuf> {
    let base = match &config.app_dir {
        Some(dir) => dir.clone(),
        None => {
            let exe = std::env::current_exe().context("cannot locate the running executable")?;
            layout::resolve_base_dir(&exe, &config.descriptor_file)
                .with_context(|| format!("no application root above {}", exe.display()))?
        }
    };
    absolute_dir(&base)
}

fn absolute_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    let canonical = std::fs::canonicalize(dir)
        .with_context(|| format!("application directory {} is not accessible", dir.display()))?;
    anyhow::ensure!(
        canonical.is_dir(),
        "application directory {} is not a directory",
        canonical.display()
    );
    Ok(canonical)
}

/// Deploy against the real host, reporting to `console`.
pub async fn run(config: DeployConfig, console: Console) -> ExitCode {
    let base = match resolve_base_dir(&config) {
        Ok(base) => base,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Cannot resolve application directory");
            let mut console = console;
            console.error(format!("{e:#}"));
            return ExitCode::FAILURE;
        }
    };

    let layout = AppLayout::new(base, &config.descriptor_file);
    let mut ctx = ExecutionContext::new(layout, console);
    let pipeline = system_pipeline(config);
    exit_code(&execute(&pipeline, &mut ctx).await)
}

/// Run `pipeline` once and print the closing line of the transcript.
pub async fn execute<P, I, D, S>(
    pipeline: &Pipeline<P, I, D, S>,
    ctx: &mut ExecutionContext,
) -> Result<DeployReport, PhaseError>
where
    P: ToolProbe,
    I: Installable,
    D: DependencyManager,
    S: ProcessSupervisor,
{
    tracing::info!(base = %ctx.base_dir().display(), "Starting deploy");
    let result = pipeline.run(ctx).await;
    match &result {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                provisioned = report.provisioned.len(),
                "Deploy succeeded",
            );
            ctx.console.success("Deployment complete");
        }
        Err(e) => {
            ctx.console
                .error(format!("Deployment aborted during {}: {}", e.phase, e.source));
        }
    }
    result
}

pub fn exit_code(result: &Result<DeployReport, PhaseError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(e.exit_code()),
    }
}
