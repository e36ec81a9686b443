//! Workspace initializer phase.
//!
//! Materializes the directories the application writes to, seeds the user
//! settings file, and brings the isolated dependency environment in line
//! with the lock file. Every step is create-if-absent or naturally
//! repeatable, so re-running it leaves the workspace unchanged.

use std::future::Future;
use std::path::Path;

use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::settings::{self, UserSettings};
use crate::subprocess;
use crate::tools::Tool;

/// Capability for the isolated dependency environment.
pub trait DependencyManager: Send + Sync {
    /// Create the environment at `venv`. Only called when it is absent.
    fn create_env(
        &self,
        venv: &Path,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Synchronize declared dependencies into the environment.
    fn sync(&self, ctx: &ExecutionContext) -> impl Future<Output = Result<(), DeployError>> + Send;
}

/// `uv`-managed virtual environment.
pub struct UvEnvironment {
    timeout: std::time::Duration,
}

impl UvEnvironment {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }

    async fn run_uv(&self, ctx: &ExecutionContext, args: &[&str]) -> Result<(), DeployError> {
        let spec = ctx
            .command(ctx.program(Tool::Uv))
            .args(args.iter().copied())
            .timeout(self.timeout);
        tracing::info!(command = %spec.display(), "Running uv");
        let output = subprocess::run_command(&spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::DependencySync(format!(
                "`{}` exited with {}: {}",
                spec.display(),
                output.exit_code,
                output.combined()
            )))
        }
    }
}

impl DependencyManager for UvEnvironment {
    async fn create_env(&self, venv: &Path, ctx: &ExecutionContext) -> Result<(), DeployError> {
        let venv = venv.to_string_lossy();
        self.run_uv(ctx, &["venv", venv.as_ref()]).await
    }

    async fn sync(&self, ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.run_uv(ctx, &["sync"]).await
    }
}

/// How the settings file was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeed {
    /// Already present; left untouched.
    Existing,
    /// Copied from the checked-in template.
    FromTemplate,
    /// No template available; written from the built-in defaults.
    FromDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceReport {
    /// Directories that did not exist before this run.
    pub created_dirs: Vec<std::path::PathBuf>,
    pub config: ConfigSeed,
    pub env_created: bool,
}

pub async fn initialize_workspace<D: DependencyManager>(
    deps: &D,
    ctx: &mut ExecutionContext,
) -> Result<WorkspaceReport, DeployError> {
    ctx.console.info("Initializing workspace");

    let mut created_dirs = Vec::new();
    for dir in ctx.layout.required_dirs() {
        if !dir.is_dir() {
            std::fs::create_dir_all(dir).map_err(|e| DeployError::workspace(dir, e))?;
            tracing::info!(dir = %dir.display(), "Created directory");
            created_dirs.push(dir.to_path_buf());
        }
    }

    let config = seed_config(ctx)?;
    match config {
        ConfigSeed::Existing => {
            tracing::debug!(path = %ctx.layout.config_file.display(), "Settings file present");
        }
        ConfigSeed::FromTemplate | ConfigSeed::FromDefaults => {
            let path = ctx.layout.config_file.display().to_string();
            ctx.console.warn(format!(
                "Created {path}; edit it to set the notification webhook before relying on notifications"
            ));
        }
    }
    for note in settings::inspect(&ctx.layout.config_file) {
        ctx.console.warn(format!("Settings: {note}"));
    }

    let venv = ctx.layout.venv.clone();
    let env_created = if venv.is_dir() {
        false
    } else {
        ctx.console.info("Creating virtual environment");
        deps.create_env(&venv, ctx).await?;
        true
    };

    ctx.console.info("Synchronizing dependencies");
    deps.sync(ctx).await?;
    ctx.console.success("Workspace ready");

    Ok(WorkspaceReport {
        created_dirs,
        config,
        env_created,
    })
}

/// Create the settings file if absent. An existing file is never touched.
fn seed_config(ctx: &ExecutionContext) -> Result<ConfigSeed, DeployError> {
    let target = &ctx.layout.config_file;
    if target.exists() {
        return Ok(ConfigSeed::Existing);
    }

    let template = &ctx.layout.config_template;
    if template.is_file() {
        std::fs::copy(template, target).map_err(|e| DeployError::workspace(target, e))?;
        Ok(ConfigSeed::FromTemplate)
    } else {
        tracing::warn!(template = %template.display(), "Settings template missing, using defaults");
        std::fs::write(target, UserSettings::default_document())
            .map_err(|e| DeployError::workspace(target, e))?;
        Ok(ConfigSeed::FromDefaults)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
