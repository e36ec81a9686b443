//! The deploy workflow.
//!
//! `ProbeEnv -> (Provision)? -> InitWorkspace -> Launch -> Verify`. Each
//! phase runs at most once per invocation and the first error ends the run.
//! Nothing is rolled back: every phase is idempotent, so recovery is simply
//! running the whole pipeline again.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DeployConfig;
use crate::context::ExecutionContext;
use crate::error::DeployError;
use crate::launch::{self, LaunchedApp};
use crate::probe::{self, ProbeReport, ToolProbe};
use crate::provision::{self, Installable};
use crate::supervisor::ProcessSupervisor;
use crate::tools::ToolStatus;
use crate::verify::{self, HealthReport};
use crate::workspace::{self, DependencyManager, WorkspaceReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ProbeEnv,
    Provision,
    InitWorkspace,
    Launch,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProbeEnv => "probe-env",
            Self::Provision => "provision",
            Self::InitWorkspace => "init-workspace",
            Self::Launch => "launch",
            Self::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// A failed run: the error and the phase it surfaced in.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: DeployError,
}

impl PhaseError {
    pub fn exit_code(&self) -> u8 {
        self.source.exit_code()
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Phases in the order they completed.
    pub phases: Vec<Phase>,
    pub probe: ProbeReport,
    pub provisioned: Vec<ToolStatus>,
    pub workspace: WorkspaceReport,
    pub app: LaunchedApp,
    pub health: HealthReport,
}

/// The external capabilities the pipeline drives.
pub struct Capabilities<P, I, D, S> {
    pub probe: P,
    pub installer: I,
    pub deps: D,
    pub supervisor: S,
}

pub struct Pipeline<P, I, D, S> {
    config: DeployConfig,
    caps: Capabilities<P, I, D, S>,
}

impl<P, I, D, S> Pipeline<P, I, D, S>
where
    P: ToolProbe,
    I: Installable,
    D: DependencyManager,
    S: ProcessSupervisor,
{
    pub fn new(config: DeployConfig, caps: Capabilities<P, I, D, S>) -> Self {
        Self { config, caps }
    }

    /// Run the whole workflow once.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<DeployReport, PhaseError> {
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("deploy", %run_id, base = %ctx.base_dir().display());
        self.run_phases(run_id, ctx).instrument(span).await
    }

    async fn run_phases(
        &self,
        run_id: Uuid,
        ctx: &mut ExecutionContext,
    ) -> Result<DeployReport, PhaseError> {
        let started_at = Utc::now();
        let mut phases = Vec::with_capacity(5);
        let caps = &self.caps;

        let probe = probe::probe_environment(&caps.probe, ctx)
            .await
            .map_err(at(Phase::ProbeEnv))?;
        phases.push(Phase::ProbeEnv);

        let missing = probe.missing();
        let provisioned = if missing.is_empty() {
            Vec::new()
        } else {
            let installed = provision::provision_missing(&caps.probe, &caps.installer, ctx, &missing)
                .await
                .map_err(at(Phase::Provision))?;
            phases.push(Phase::Provision);
            installed
        };

        let workspace = workspace::initialize_workspace(&caps.deps, ctx)
            .await
            .map_err(at(Phase::InitWorkspace))?;
        phases.push(Phase::InitWorkspace);

        let app = launch::launch(&caps.supervisor, &self.config, ctx)
            .await
            .map_err(at(Phase::Launch))?;
        phases.push(Phase::Launch);

        let health = verify::verify(&caps.supervisor, &app, self.config.verify_delay(), ctx)
            .await
            .map_err(at(Phase::Verify))?;
        phases.push(Phase::Verify);

        let finished_at = Utc::now();
        tracing::info!(
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            warnings = ctx.console.warning_count(),
            "Deploy finished",
        );

        Ok(DeployReport {
            run_id,
            started_at,
            finished_at,
            phases,
            probe,
            provisioned,
            workspace,
            app,
            health,
        })
    }
}

fn at(phase: Phase) -> impl Fn(DeployError) -> PhaseError {
    move |source| {
        tracing::error!(%phase, error = %source, "Deploy phase failed");
        PhaseError { phase, source }
    }
}
