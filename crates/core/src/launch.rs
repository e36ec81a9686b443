//! Launch delegate phase.
//!
//! Points the process descriptor at the resolved base directory, replaces
//! any previously supervised instance of the same name, starts a new one,
//! and persists the supervisor state for reboots.

use std::path::Path;

use crate::config::{self, DeployConfig};
use crate::context::ExecutionContext;
use crate::descriptor::{self, ProcessDescriptor};
use crate::error::DeployError;
use crate::supervisor::{ProcessSupervisor, StopOutcome};

/// What the launch phase handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedApp {
    pub name: String,
    /// Listening address, from the descriptor args when declared there.
    pub address: String,
    pub port: u16,
    /// Placeholder occurrences replaced in the descriptor this run.
    pub substitutions: usize,
    /// Whether the descriptor was generated because none existed.
    pub descriptor_generated: bool,
    pub previous_instance: StopOutcome,
}

pub async fn launch<S: ProcessSupervisor>(
    supervisor: &S,
    config: &DeployConfig,
    ctx: &mut ExecutionContext,
) -> Result<LaunchedApp, DeployError> {
    let descriptor_path = ctx.layout.descriptor.clone();
    let base = ctx.base_dir().to_path_buf();

    let descriptor_generated = !descriptor_path.exists();
    if descriptor_generated {
        ctx.console.warn(format!(
            "{} not found; writing a default process descriptor",
            descriptor_path.display()
        ));
        ProcessDescriptor::render_default(config, &base).write(&descriptor_path)?;
    }

    let substitutions = descriptor::substitute_placeholder(&descriptor_path, &config.placeholder, &base)?;
    if substitutions > 0 {
        tracing::info!(substitutions, base = %base.display(), "Descriptor paths rewritten");
        ctx.console
            .info(format!("Process descriptor now points at {}", base.display()));
    }

    let descriptor = ProcessDescriptor::load(&descriptor_path)?;
    let app = descriptor.select_app(&config.process_name)?;
    check_working_dir(app.cwd.as_deref(), &base)?;

    let name = app.name.clone();
    if !config::is_safe_process_name(&name) {
        return Err(DeployError::Descriptor(format!(
            "app name '{name}' is not usable as a supervisor process name"
        )));
    }
    if name != config.process_name {
        ctx.console.warn(format!(
            "Descriptor names the process '{name}', not '{}'; using '{name}'",
            config.process_name
        ));
    }
    let port = app.declared_port().unwrap_or(config.port);
    let address = app
        .declared_address()
        .unwrap_or_else(|| config.address.clone());

    ctx.console.warn(format!(
        "The app listens on {address}:{port} with CORS and XSRF protection disabled; \
         expose it only on a trusted network or behind a reverse proxy"
    ));

    let previous_instance = supervisor.delete(&name, ctx).await?;
    match previous_instance {
        StopOutcome::Removed => ctx.console.info(format!("Removed previous instance of {name}")),
        StopOutcome::NotFound => tracing::debug!(name, "No previous instance to remove"),
    }

    ctx.console.info(format!("Starting {name}"));
    supervisor.start(&descriptor_path, ctx).await?;

    supervisor.save(ctx).await?;
    supervisor.enable_on_boot(ctx).await?;
    ctx.console.success(format!("{name} handed to the supervisor"));

    Ok(LaunchedApp {
        name,
        address,
        port,
        substitutions,
        descriptor_generated,
        previous_instance,
    })
}

/// The descriptor's working directory must be absolute and be the base dir.
fn check_working_dir(cwd: Option<&Path>, base: &Path) -> Result<(), DeployError> {
    let Some(cwd) = cwd else {
        return Err(DeployError::Descriptor("app declares no cwd".into()));
    };
    if !cwd.is_absolute() {
        return Err(DeployError::Descriptor(format!(
            "cwd '{}' is not an absolute path",
            cwd.display()
        )));
    }
    if cwd != base {
        return Err(DeployError::Descriptor(format!(
            "cwd '{}' does not match the deploy directory '{}'",
            cwd.display(),
            base.display()
        )));
    }
    Ok(())
}
