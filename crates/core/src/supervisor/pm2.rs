//! pm2 CLI client.
//!
//! Every operation is one `pm2` invocation through the context's search
//! path. Instance state comes from `pm2 jlist`, pm2's machine-readable
//! process list.

use std::path::Path;

use serde::Deserialize;

use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::subprocess::{self, CommandOutput, CommandSpec, QUICK_TIMEOUT};
use crate::tools::Tool;

use super::{ProcessInfo, ProcessStatus, ProcessSupervisor, StopOutcome};

/// `pm2 start` waits for the app to fork; give it more room than a query.
const START_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

pub struct Pm2Supervisor;

#[derive(Debug, Deserialize)]
struct JlistEntry {
    name: String,
    pm_id: u32,
    #[serde(default)]
    pid: Option<u32>,
    pm2_env: JlistEnv,
}

#[derive(Debug, Deserialize)]
struct JlistEnv {
    status: ProcessStatus,
    #[serde(default)]
    restart_time: u32,
}

impl Pm2Supervisor {
    fn pm2(&self, ctx: &ExecutionContext) -> CommandSpec {
        ctx.command(ctx.program(Tool::Pm2)).timeout(QUICK_TIMEOUT)
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeployError> {
        tracing::info!(command = %spec.display(), "Running supervisor command");
        Ok(subprocess::run_command(&spec).await?)
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput, DeployError> {
        let command = spec.display();
        let output = self.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::Supervisor {
                command,
                message: format!("exit {}: {}", output.exit_code, output.combined()),
            })
        }
    }

    /// Boot registration command. As root pm2 configures the init system
    /// itself; otherwise it has to be run through sudo for the deploying
    /// user, with a `PATH` that still reaches node.
    fn startup_command(&self, ctx: &ExecutionContext) -> CommandSpec {
        let pm2 = ctx.program(Tool::Pm2).to_string_lossy().into_owned();
        match (ctx.is_root(), ctx.user.as_deref(), ctx.home.as_deref()) {
            (false, Some(user), Some(home)) => ctx
                .command("sudo")
                .arg("env")
                .arg(format!("PATH={}", ctx.search_path().to_string_lossy()))
                .args([pm2.as_str(), "startup", "systemd", "-u", user, "--hp"])
                .arg(home.to_string_lossy().into_owned())
                .timeout(START_TIMEOUT),
            _ => self.pm2(ctx).arg("startup").timeout(START_TIMEOUT),
        }
    }
}

impl ProcessSupervisor for Pm2Supervisor {
    async fn delete(&self, name: &str, ctx: &ExecutionContext) -> Result<StopOutcome, DeployError> {
        let spec = self.pm2(ctx).args(["delete", name]);
        let command = spec.display();
        let output = self.run(spec).await?;

        if output.success() {
            Ok(StopOutcome::Removed)
        } else if is_not_found(&output.combined()) {
            Ok(StopOutcome::NotFound)
        } else {
            Err(DeployError::Supervisor {
                command,
                message: output.combined(),
            })
        }
    }

    async fn start(&self, descriptor: &Path, ctx: &ExecutionContext) -> Result<(), DeployError> {
        let spec = self
            .pm2(ctx)
            .arg("start")
            .arg(descriptor.to_string_lossy().into_owned())
            .timeout(START_TIMEOUT);
        self.run_checked(spec).await.map(|_| ())
    }

    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<ProcessInfo>, DeployError> {
        let spec = self.pm2(ctx).arg("jlist");
        let command = spec.display();
        let output = self.run_checked(spec).await?;
        parse_jlist(&output.stdout).map_err(|message| DeployError::Supervisor { command, message })
    }

    async fn save(&self, ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.run_checked(self.pm2(ctx).arg("save")).await.map(|_| ())
    }

    async fn enable_on_boot(&self, ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.run_checked(self.startup_command(ctx)).await.map(|_| ())
    }

    fn management_commands(&self, name: &str) -> Vec<String> {
        vec![
            "pm2 status".to_string(),
            format!("pm2 logs {name}"),
            format!("pm2 restart {name}"),
            format!("pm2 stop {name}"),
            "pm2 monit".to_string(),
        ]
    }

    fn logs_command(&self, name: &str) -> String {
        format!("pm2 logs {name} --lines 50")
    }
}

fn is_not_found(output: &str) -> bool {
    output.to_ascii_lowercase().contains("not found")
}

/// Parse `pm2 jlist` output. The list is a single JSON line, but pm2 may
/// print daemon or update notices (some starting with `[PM2]`) around it.
fn parse_jlist(stdout: &str) -> Result<Vec<ProcessInfo>, String> {
    let mut last_err = "no process list in pm2 output".to_string();
    for line in stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('['))
    {
        match serde_json::from_str::<Vec<JlistEntry>>(line) {
            Ok(entries) => return Ok(entries.into_iter().map(ProcessInfo::from).collect()),
            Err(e) => last_err = e.to_string(),
        }
    }
    Err(last_err)
}

impl From<JlistEntry> for ProcessInfo {
    fn from(e: JlistEntry) -> Self {
        Self {
            name: e.name,
            id: e.pm_id,
            pid: e.pid.filter(|&pid| pid != 0),
            status: e.pm2_env.status,
            restarts: e.pm2_env.restart_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
