//! Process descriptor: pm2's JSON process file.
//!
//! The checked-in descriptor carries a placeholder path wherever the
//! application directory belongs. Before every launch the placeholder is
//! replaced in place with the resolved base directory. Substitution is
//! textual so the operator's formatting and extra keys survive, and it
//! is a no-op once no placeholder remains.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DeployConfig;
use crate::error::DeployError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub apps: Vec<AppDeclaration>,
}

/// One pm2-managed application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDeclaration {
    pub name: String,
    /// Working directory; must equal the deploy base directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<AppArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autorestart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

/// pm2 accepts arguments either as one command line or as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppArgs {
    List(Vec<String>),
    Line(String),
}

impl AppDeclaration {
    /// Port the application listens on, from `env.PORT` when declared.
    pub fn declared_port(&self) -> Option<u16> {
        match self.env.get("PORT")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Listening address passed via `--server.address` in `args`.
    pub fn declared_address(&self) -> Option<String> {
        let tokens: Vec<&str> = match self.args.as_ref()? {
            AppArgs::List(list) => list.iter().map(String::as_str).collect(),
            AppArgs::Line(line) => line.split_whitespace().collect(),
        };
        tokens.iter().enumerate().find_map(|(i, token)| {
            match token.split_once('=') {
                Some(("--server.address", value)) => Some(value.to_string()),
                _ if *token == "--server.address" => tokens.get(i + 1).map(|v| v.to_string()),
                _ => None,
            }
        })
    }
}

impl ProcessDescriptor {
    /// Default descriptor running the Streamlit app from the project venv.
    ///
    /// Binds all interfaces with Streamlit's CORS and XSRF protections off;
    /// the deployment is meant for a trusted network or a reverse proxy.
    pub fn render_default(config: &DeployConfig, base: &Path) -> Self {
        let port = config.port.to_string();
        let args = [
            "run",
            "app.py",
            "--server.port",
            port.as_str(),
            "--server.address",
            config.address.as_str(),
            "--server.headless",
            "true",
            "--server.enableCORS",
            "false",
            "--server.enableXsrfProtection",
            "false",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut env = BTreeMap::new();
        env.insert("PORT".to_string(), Value::from(config.port));
        env.insert("PYTHONUNBUFFERED".to_string(), Value::from("1"));

        Self {
            apps: vec![AppDeclaration {
                name: config.process_name.clone(),
                cwd: Some(base.to_path_buf()),
                script: ".venv/bin/streamlit".to_string(),
                args: Some(AppArgs::List(args)),
                interpreter: Some("none".to_string()),
                env,
                out_file: Some(base.join("logs/out.log").display().to_string()),
                error_file: Some(base.join("logs/error.log").display().to_string()),
                autorestart: Some(true),
                max_restarts: Some(10),
            }],
        }
    }

    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let raw = std::fs::read_to_string(path).map_err(|e| DeployError::workspace(path, e))?;
        serde_json::from_str(&raw).map_err(|e| {
            DeployError::Descriptor(format!("{} is not a valid process file: {e}", path.display()))
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), DeployError> {
        let mut doc = serde_json::to_string_pretty(self)
            .map_err(|e| DeployError::Descriptor(e.to_string()))?;
        doc.push('\n');
        write_replacing(path, &doc)
    }

    /// The app to supervise: the one named `preferred`, or the only app.
    pub fn select_app(&self, preferred: &str) -> Result<&AppDeclaration, DeployError> {
        if let Some(app) = self.apps.iter().find(|a| a.name == preferred) {
            return Ok(app);
        }
        match self.apps.as_slice() {
            [only] => Ok(only),
            [] => Err(DeployError::Descriptor("process file declares no apps".into())),
            _ => Err(DeployError::Descriptor(format!(
                "process file declares several apps and none is named '{preferred}'"
            ))),
        }
    }
}

/// Replace every occurrence of `placeholder` in the descriptor at `path`
/// with `actual`, writing the file only when something changed.
///
/// Returns the number of replacements made.
pub fn substitute_placeholder(
    path: &Path,
    placeholder: &str,
    actual: &Path,
) -> Result<usize, DeployError> {
    let text = std::fs::read_to_string(path).map_err(|e| DeployError::workspace(path, e))?;
    let (rewritten, count) = substitute(&text, placeholder, &json_escape(actual));
    if count > 0 {
        write_replacing(path, &rewritten)?;
    }
    Ok(count)
}

/// Replace `placeholder` by `actual` in `text`.
///
/// When `actual` itself contains the placeholder (for instance the app was
/// deployed to `<placeholder>-v2`), existing occurrences of `actual` are
/// left alone so a second pass does not rewrite the first pass's output.
fn substitute(text: &str, placeholder: &str, actual: &str) -> (String, usize) {
    if placeholder.is_empty() || placeholder == actual {
        return (text.to_string(), 0);
    }
    if !actual.contains(placeholder) {
        let count = text.matches(placeholder).count();
        return (text.replace(placeholder, actual), count);
    }

    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    for (i, segment) in text.split(actual).enumerate() {
        if i > 0 {
            out.push_str(actual);
        }
        count += segment.matches(placeholder).count();
        out.push_str(&segment.replace(placeholder, actual));
    }
    (out, count)
}

/// A path as it appears inside a JSON string literal.
fn json_escape(path: &Path) -> String {
    let quoted = serde_json::to_string(&path.to_string_lossy()).unwrap_or_default();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&quoted)
        .to_string()
}

/// Write through a sibling temp file and rename, so a crash never leaves a
/// half-written descriptor behind.
fn write_replacing(path: &Path, contents: &str) -> Result<(), DeployError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents).map_err(|e| DeployError::workspace(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        DeployError::workspace(path, e)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
