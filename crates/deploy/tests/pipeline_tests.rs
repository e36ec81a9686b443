//! Integration tests for the deploy pipeline.
//!
//! Runs the full workflow against a temporary application directory with
//! in-memory fakes standing in for the host: tool lookups, installers, the
//! dependency manager and the process supervisor.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use cytodeploy::execute;
use cytodeploy_core::config::DeployConfig;
use cytodeploy_core::console::{Console, Transcript};
use cytodeploy_core::context::ExecutionContext;
use cytodeploy_core::descriptor::ProcessDescriptor;
use cytodeploy_core::error::DeployError;
use cytodeploy_core::layout::AppLayout;
use cytodeploy_core::pipeline::{Capabilities, Phase, Pipeline};
use cytodeploy_core::probe::ToolProbe;
use cytodeploy_core::provision::Installable;
use cytodeploy_core::supervisor::{ProcessInfo, ProcessStatus, ProcessSupervisor, StopOutcome};
use cytodeploy_core::tools::{Tool, ToolStatus};
use cytodeploy_core::workspace::{ConfigSeed, DependencyManager};
use tempfile::TempDir;

const DESCRIPTOR_TEMPLATE: &str = include_str!("../../../demos/ecosystem.config.json");
const SETTINGS_TEMPLATE: &str = include_str!("../../../demos/user_settings.example.json");
const PLACEHOLDER: &str = "/path/to/allergy-cytotoxic";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Shared state of the simulated host.
#[derive(Clone, Default)]
struct Host {
    installed: Arc<Mutex<BTreeSet<Tool>>>,
    processes: Arc<Mutex<Vec<ProcessInfo>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Host {
    fn with_tools(tools: &[Tool]) -> Self {
        let host = Self::default();
        host.installed.lock().unwrap().extend(tools.iter().copied());
        host
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn process_count(&self, name: &str) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.name == name)
            .count()
    }
}

struct FakeProbe(Host);

impl ToolProbe for FakeProbe {
    async fn probe(&self, tool: Tool, _ctx: &ExecutionContext) -> ToolStatus {
        if self.0.installed.lock().unwrap().contains(&tool) {
            ToolStatus {
                tool,
                path: Some(PathBuf::from("/usr/local/bin").join(tool.binary())),
                version: Some("1.0.0".into()),
            }
        } else {
            ToolStatus::missing(tool)
        }
    }
}

struct FakeInstaller {
    host: Host,
    /// Report success without actually installing anything.
    ineffective: bool,
}

impl Installable for FakeInstaller {
    async fn install(&self, tool: Tool, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.host.record(format!("install {}", tool.binary()));
        if !self.ineffective {
            self.host.installed.lock().unwrap().insert(tool);
        }
        Ok(())
    }
}

struct FakeDeps(Host);

impl DependencyManager for FakeDeps {
    async fn create_env(&self, venv: &Path, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.0.record("create-env");
        std::fs::create_dir_all(venv).map_err(|e| DeployError::workspace(venv, e))
    }

    async fn sync(&self, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.0.record("sync");
        Ok(())
    }
}

struct FakeSupervisor {
    host: Host,
    /// Status new instances end up in; `None` means they never appear.
    start_status: Option<ProcessStatus>,
}

impl ProcessSupervisor for FakeSupervisor {
    async fn delete(&self, name: &str, _ctx: &ExecutionContext) -> Result<StopOutcome, DeployError> {
        self.host.record(format!("delete {name}"));
        let mut processes = self.host.processes.lock().unwrap();
        let before = processes.len();
        processes.retain(|p| p.name != name);
        Ok(if processes.len() < before {
            StopOutcome::Removed
        } else {
            StopOutcome::NotFound
        })
    }

    async fn start(&self, descriptor: &Path, ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.host.record("start");
        let descriptor = ProcessDescriptor::load(descriptor)?;
        assert!(
            descriptor
                .apps
                .iter()
                .all(|a| a.cwd.as_deref() == Some(ctx.base_dir())),
            "supervisor must only see resolved paths"
        );
        if let Some(status) = &self.start_status {
            let mut processes = self.host.processes.lock().unwrap();
            for app in &descriptor.apps {
                let id = processes.len() as u32;
                processes.push(ProcessInfo {
                    name: app.name.clone(),
                    id,
                    pid: Some(4000 + id),
                    status: status.clone(),
                    restarts: 0,
                });
            }
        }
        Ok(())
    }

    async fn list(&self, _ctx: &ExecutionContext) -> Result<Vec<ProcessInfo>, DeployError> {
        self.host.record("list");
        Ok(self.host.processes.lock().unwrap().clone())
    }

    async fn save(&self, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.host.record("save");
        Ok(())
    }

    async fn enable_on_boot(&self, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.host.record("startup");
        Ok(())
    }

    fn management_commands(&self, name: &str) -> Vec<String> {
        vec!["pm2 status".into(), format!("pm2 restart {name}")]
    }

    fn logs_command(&self, name: &str) -> String {
        format!("pm2 logs {name} --lines 50")
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type FakePipeline = Pipeline<FakeProbe, FakeInstaller, FakeDeps, FakeSupervisor>;

struct Fixture {
    dir: TempDir,
    host: Host,
}

impl Fixture {
    /// An app checkout with the stock descriptor and settings template.
    fn checkout(tools: &[Tool]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("ecosystem.config.json"), DESCRIPTOR_TEMPLATE)
            .expect("write descriptor");
        std::fs::create_dir_all(dir.path().join("config")).expect("config dir");
        std::fs::write(
            dir.path().join("config/user_settings.example.json"),
            SETTINGS_TEMPLATE,
        )
        .expect("write template");
        Self {
            dir,
            host: Host::with_tools(tools),
        }
    }

    fn base(&self) -> &Path {
        self.dir.path()
    }

    fn pipeline(&self, start_status: Option<ProcessStatus>, ineffective: bool) -> FakePipeline {
        let config = DeployConfig {
            verify_delay_secs: 0,
            ..DeployConfig::default()
        };
        Pipeline::new(
            config,
            Capabilities {
                probe: FakeProbe(self.host.clone()),
                installer: FakeInstaller {
                    host: self.host.clone(),
                    ineffective,
                },
                deps: FakeDeps(self.host.clone()),
                supervisor: FakeSupervisor {
                    host: self.host.clone(),
                    start_status,
                },
            },
        )
    }

    fn context(&self) -> (ExecutionContext, Transcript) {
        let transcript = Transcript::new();
        let ctx = ExecutionContext::new(
            AppLayout::new(self.base(), "ecosystem.config.json"),
            Console::new(Box::new(transcript.clone())),
        )
        .with_inherited_path(None)
        .with_home(None)
        .with_user(None);
        (ctx, transcript)
    }

    fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.base().join(relative)).expect("read file")
    }
}

fn healthy_pipeline(fixture: &Fixture) -> FakePipeline {
    fixture.pipeline(Some(ProcessStatus::Online), false)
}

// ---------------------------------------------------------------------------
// Test: happy path
// ---------------------------------------------------------------------------

/// With every tool present the run skips provisioning, prepares the
/// workspace, launches once and prints the access URL.
#[tokio::test]
async fn ready_host_deploys_and_prints_access_url() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, transcript) = fixture.context();

    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");

    assert_eq!(
        report.phases,
        vec![Phase::ProbeEnv, Phase::InitWorkspace, Phase::Launch, Phase::Verify]
    );
    assert!(report.provisioned.is_empty());
    assert_eq!(report.health.access_url, "http://0.0.0.0:8501");
    assert_eq!(report.app.name, "cytotoxic-scheduler");
    assert!(report.started_at <= report.finished_at);

    for dir in ["logs", "data", "data/archive", "config", ".venv"] {
        assert!(fixture.base().join(dir).is_dir(), "{dir} should exist");
    }
    assert_eq!(report.workspace.config, ConfigSeed::FromTemplate);
    assert_eq!(fixture.read("config/user_settings.json"), SETTINGS_TEMPLATE);

    let output = transcript.contents();
    assert!(output.contains("0.0.0.0:8501"), "{output}");
    assert!(output.contains("[SUCCESS] Deployment complete"), "{output}");
    assert!(output.contains("pm2 restart cytotoxic-scheduler"), "{output}");

    assert_eq!(
        fixture.host.calls(),
        vec![
            "create-env",
            "sync",
            "delete cytotoxic-scheduler",
            "start",
            "save",
            "startup",
            "list",
        ]
    );
}

/// The placeholder is replaced by the base directory everywhere in the
/// descriptor and the rest of the document is preserved.
#[tokio::test]
async fn descriptor_paths_point_at_base_dir() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, _) = fixture.context();

    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");
    assert_eq!(report.app.substitutions, 3);
    assert!(!report.app.descriptor_generated);

    let text = fixture.read("ecosystem.config.json");
    assert!(!text.contains(PLACEHOLDER), "{text}");
    assert!(text.contains("\"watch\": false"), "unknown keys survive");

    let descriptor =
        ProcessDescriptor::load(&fixture.base().join("ecosystem.config.json")).expect("valid");
    let app = &descriptor.apps[0];
    assert_eq!(app.cwd.as_deref(), Some(fixture.base()));
    let expected_log = fixture.base().join("logs/out.log").display().to_string();
    assert_eq!(app.out_file.as_deref(), Some(expected_log.as_str()));
}

// ---------------------------------------------------------------------------
// Test: idempotence
// ---------------------------------------------------------------------------

/// A second run on the same host changes nothing on disk and leaves exactly
/// one supervised instance.
#[tokio::test]
async fn second_run_is_idempotent() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = healthy_pipeline(&fixture);

    let (mut ctx, _) = fixture.context();
    let first = execute(&pipeline, &mut ctx).await.expect("first run");
    let descriptor_after_first = fixture.read("ecosystem.config.json");
    let settings_after_first = fixture.read("config/user_settings.json");

    let (mut ctx, _) = fixture.context();
    let second = execute(&pipeline, &mut ctx).await.expect("second run");

    assert_eq!(first.app.previous_instance, StopOutcome::NotFound);
    assert_eq!(second.app.previous_instance, StopOutcome::Removed);
    assert_eq!(second.app.substitutions, 0);
    assert!(second.workspace.created_dirs.is_empty());
    assert!(!second.workspace.env_created);
    assert_eq!(second.workspace.config, ConfigSeed::Existing);

    assert_eq!(fixture.read("ecosystem.config.json"), descriptor_after_first);
    assert_eq!(fixture.read("config/user_settings.json"), settings_after_first);
    assert_eq!(fixture.host.process_count("cytotoxic-scheduler"), 1);

    let creates = fixture
        .host
        .calls()
        .iter()
        .filter(|c| *c == "create-env")
        .count();
    assert_eq!(creates, 1);
}

/// An operator-edited settings file survives a deploy byte for byte.
#[tokio::test]
async fn existing_settings_are_never_overwritten() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let custom = r#"{"notification": {"enabled": true, "webhook_url": "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=abc"}}"#;
    std::fs::write(fixture.base().join("config/user_settings.json"), custom).expect("write");

    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, _) = fixture.context();
    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");

    assert_eq!(report.workspace.config, ConfigSeed::Existing);
    assert_eq!(fixture.read("config/user_settings.json"), custom);
}

/// Without a template the settings file is seeded from the built-in
/// defaults and the operator is told about it.
#[tokio::test]
async fn missing_template_seeds_default_settings() {
    let fixture = Fixture::checkout(&Tool::ALL);
    std::fs::remove_file(fixture.base().join("config/user_settings.example.json"))
        .expect("remove template");

    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, transcript) = fixture.context();
    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");

    assert_eq!(report.workspace.config, ConfigSeed::FromDefaults);
    let settings: serde_json::Value =
        serde_json::from_str(&fixture.read("config/user_settings.json")).expect("json");
    assert_eq!(settings["notification"]["push_time"], "08:00");
    assert!(transcript.contents().contains("[WARNING] Created"));
}

/// A checkout without a descriptor gets a generated one bound to the base
/// directory.
#[tokio::test]
async fn missing_descriptor_is_generated() {
    let fixture = Fixture::checkout(&Tool::ALL);
    std::fs::remove_file(fixture.base().join("ecosystem.config.json")).expect("remove");

    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, _) = fixture.context();
    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");

    assert!(report.app.descriptor_generated);
    assert_eq!(report.app.port, 8501);
    let descriptor =
        ProcessDescriptor::load(&fixture.base().join("ecosystem.config.json")).expect("valid");
    assert_eq!(descriptor.apps[0].cwd.as_deref(), Some(fixture.base()));
    assert_eq!(descriptor.apps[0].script, ".venv/bin/streamlit");
}

// ---------------------------------------------------------------------------
// Test: provisioning
// ---------------------------------------------------------------------------

/// Missing optional tools are installed in catalogue order before the
/// workspace is touched.
#[tokio::test]
async fn missing_tools_are_provisioned_in_order() {
    let fixture = Fixture::checkout(&[Tool::Python]);
    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, _) = fixture.context();

    let report = execute(&pipeline, &mut ctx).await.expect("deploy succeeds");

    assert_eq!(report.phases[1], Phase::Provision);
    let provisioned: Vec<Tool> = report.provisioned.iter().map(|s| s.tool).collect();
    assert_eq!(provisioned, vec![Tool::Uv, Tool::Node, Tool::Pm2]);
    assert_eq!(
        &fixture.host.calls()[..4],
        &["install uv", "install node", "install pm2", "create-env"]
    );
    assert!(ctx.tool_path(Tool::Pm2).is_some());
}

/// An installer that reports success but leaves the tool absent is a hard
/// stop; nothing downstream runs.
#[tokio::test]
async fn ineffective_install_aborts_run() {
    let fixture = Fixture::checkout(&[Tool::Python, Tool::Node, Tool::Pm2]);
    let pipeline = fixture.pipeline(Some(ProcessStatus::Online), true);
    let (mut ctx, transcript) = fixture.context();

    let err = execute(&pipeline, &mut ctx).await.expect_err("must fail");

    assert_eq!(err.phase, Phase::Provision);
    assert_matches!(err.source, DeployError::ProvisioningFailed { tool: Tool::Uv });
    assert_eq!(fixture.host.calls(), vec!["install uv"]);
    assert!(!fixture.base().join("logs").exists());
    assert!(!transcript.contents().contains("Deployment complete"));
}

// ---------------------------------------------------------------------------
// Test: fatal probe failure
// ---------------------------------------------------------------------------

/// Without Python nothing is installed, created or launched, and the
/// operator is told to install it by hand.
#[tokio::test]
async fn missing_python_aborts_before_any_mutation() {
    let fixture = Fixture::checkout(&[Tool::Uv, Tool::Node, Tool::Pm2]);
    let pipeline = healthy_pipeline(&fixture);
    let (mut ctx, transcript) = fixture.context();

    let err = execute(&pipeline, &mut ctx).await.expect_err("must fail");

    assert_eq!(err.phase, Phase::ProbeEnv);
    assert_matches!(err.source, DeployError::MissingInterpreter { tool: Tool::Python });
    assert_eq!(err.exit_code(), 1);
    assert!(fixture.host.calls().is_empty());

    for dir in ["logs", "data", ".venv"] {
        assert!(!fixture.base().join(dir).exists(), "{dir} must not be created");
    }
    assert!(!fixture.base().join("config/user_settings.json").exists());
    assert_eq!(fixture.read("ecosystem.config.json"), DESCRIPTOR_TEMPLATE);

    let output = transcript.contents();
    assert!(output.contains("[ERROR] Python 3 is not installed"), "{output}");
    assert!(!output.contains("[SUCCESS]"), "{output}");
}

// ---------------------------------------------------------------------------
// Test: verification
// ---------------------------------------------------------------------------

/// An app that crashes right after start fails the run with its status and
/// the logs command, and no access URL is printed.
#[tokio::test]
async fn errored_app_fails_verification() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = fixture.pipeline(Some(ProcessStatus::Errored), false);
    let (mut ctx, transcript) = fixture.context();

    let err = execute(&pipeline, &mut ctx).await.expect_err("must fail");

    assert_eq!(err.phase, Phase::Verify);
    assert_matches!(
        &err.source,
        DeployError::Unhealthy { name, status } if name == "cytotoxic-scheduler" && status == "errored"
    );
    let output = transcript.contents();
    assert!(output.contains("pm2 logs cytotoxic-scheduler --lines 50"), "{output}");
    assert!(!output.contains("Access the application"), "{output}");
    assert!(!output.contains("Deployment complete"), "{output}");
}

#[tokio::test]
async fn stopped_app_fails_verification() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = fixture.pipeline(Some(ProcessStatus::Stopped), false);
    let (mut ctx, _) = fixture.context();

    let err = execute(&pipeline, &mut ctx).await.expect_err("must fail");
    assert_matches!(err.source, DeployError::Unhealthy { status, .. } if status == "stopped");
}

/// An instance the supervisor never lists counts as not started.
#[tokio::test]
async fn absent_app_fails_verification() {
    let fixture = Fixture::checkout(&Tool::ALL);
    let pipeline = fixture.pipeline(None, false);
    let (mut ctx, _) = fixture.context();

    let err = execute(&pipeline, &mut ctx).await.expect_err("must fail");
    assert_matches!(err.source, DeployError::Unhealthy { status, .. } if status == "missing");
}
