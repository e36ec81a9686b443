//! Post-launch verifier phase.
//!
//! A single status check after a fixed delay. The supervisor reporting a
//! successful start only means the process was forked; this is where a
//! crash right after startup gets caught.

use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::launch::LaunchedApp;
use crate::supervisor::{ProcessInfo, ProcessSupervisor};

/// Verified state of the launched app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub instances: Vec<ProcessInfo>,
    pub access_url: String,
}

pub async fn verify<S: ProcessSupervisor>(
    supervisor: &S,
    app: &LaunchedApp,
    delay: Duration,
    ctx: &mut ExecutionContext,
) -> Result<HealthReport, DeployError> {
    ctx.console.info(format!(
        "Waiting {}s before checking {}",
        delay.as_secs(),
        app.name
    ));
    tokio::time::sleep(delay).await;

    let instances: Vec<ProcessInfo> = supervisor
        .list(ctx)
        .await?
        .into_iter()
        .filter(|p| p.name == app.name)
        .collect();

    if let Some(status) = unhealthy_status(&instances) {
        ctx.console
            .error(format!("{} failed to start (status: {status})", app.name));
        ctx.console.info("Inspect the logs with:");
        ctx.console.line(supervisor.logs_command(&app.name));
        return Err(DeployError::Unhealthy {
            name: app.name.clone(),
            status,
        });
    }

    let access_url = format!("http://{}:{}", app.address, app.port);
    tracing::info!(name = %app.name, instances = instances.len(), %access_url, "Launch verified");
    ctx.console.success(format!("{} is online", app.name));
    ctx.console.info(format!("Access the application at {access_url}"));
    if app.address == "0.0.0.0" {
        ctx.console.line(format!(
            "(listening on all interfaces, port {}; use this host's address)",
            app.port
        ));
    }
    ctx.console.info("Manage the process with:");
    for command in supervisor.management_commands(&app.name) {
        ctx.console.line(command);
    }

    Ok(HealthReport {
        instances,
        access_url,
    })
}

/// `None` when every instance is online; otherwise the status to report.
fn unhealthy_status(instances: &[ProcessInfo]) -> Option<String> {
    if instances.is_empty() {
        return Some("missing".to_string());
    }
    instances
        .iter()
        .find(|p| !p.status.is_healthy())
        .map(|p| p.status.to_string())
}
