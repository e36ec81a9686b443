//! Catalogue of the external tools the deployment depends on.
//!
//! Each [`Tool`] knows its binary name, whether its absence is fatal, how
//! to install it, and where installers are known to drop it when the
//! install location is not yet on `PATH`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// uv's official installer script.
pub const UV_INSTALL_URL: &str = "https://astral.sh/uv/install.sh";

/// NodeSource repository setup script for the current LTS line.
pub const NODESOURCE_SETUP_URL: &str = "https://deb.nodesource.com/setup_lts.x";

/// Extracts a dotted version (`3.11.4`, `v20.1.0`, `uv 0.4.18`).
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+(?:\.\d+)?)").expect("version regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tool {
    /// Primary interpreter running the application.
    Python,
    /// Package manager owning the isolated dependency environment.
    Uv,
    /// Secondary runtime, needed only to host pm2.
    Node,
    /// Process supervisor.
    Pm2,
}

impl Tool {
    /// Probe and provisioning order. Node precedes pm2 because pm2 is
    /// installed through npm.
    pub const ALL: [Tool; 4] = [Tool::Python, Tool::Uv, Tool::Node, Tool::Pm2];

    pub fn binary(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Uv => "uv",
            Self::Node => "node",
            Self::Pm2 => "pm2",
        }
    }

    /// Absence of a required tool aborts the run without provisioning.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Python)
    }

    /// Installation procedure, or `None` for tools that must be installed
    /// manually.
    pub fn install_recipe(self) -> Option<Vec<InstallStep>> {
        match self {
            Self::Python => None,
            Self::Uv => Some(vec![InstallStep::FetchAndRun {
                url: UV_INSTALL_URL,
                shell: "sh",
                elevated: false,
            }]),
            Self::Node => Some(vec![
                InstallStep::FetchAndRun {
                    url: NODESOURCE_SETUP_URL,
                    shell: "bash",
                    elevated: true,
                },
                InstallStep::Run {
                    program: "apt-get",
                    args: &["install", "-y", "nodejs"],
                    elevated: true,
                },
            ]),
            Self::Pm2 => Some(vec![InstallStep::Run {
                program: "npm",
                args: &["install", "-g", "pm2"],
                elevated: true,
            }]),
        }
    }

    /// Absolute locations installers use that may be missing from the
    /// current `PATH`.
    pub fn fallback_paths(self, home: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let binary = self.binary();
        match self {
            Self::Python => {}
            Self::Uv => {
                if let Some(home) = home {
                    paths.push(home.join(".local/bin").join(binary));
                    paths.push(home.join(".cargo/bin").join(binary));
                }
            }
            Self::Node => {
                paths.push(PathBuf::from("/usr/bin").join(binary));
                paths.push(PathBuf::from("/usr/local/bin").join(binary));
            }
            Self::Pm2 => {
                paths.push(PathBuf::from("/usr/local/bin").join(binary));
                paths.push(PathBuf::from("/usr/bin").join(binary));
                if let Some(home) = home {
                    paths.push(home.join(".npm-global/bin").join(binary));
                }
            }
        }
        paths
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Python => "Python 3",
            Self::Uv => "uv",
            Self::Node => "Node.js",
            Self::Pm2 => "pm2",
        };
        f.write_str(name)
    }
}

/// One step of a tool's installation procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// Download a script and pipe it into `shell` (the `curl | sh` idiom).
    FetchAndRun {
        url: &'static str,
        shell: &'static str,
        elevated: bool,
    },
    /// Run a program found on the search path.
    Run {
        program: &'static str,
        args: &'static [&'static str],
        elevated: bool,
    },
}

/// Result of probing one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub tool: Tool,
    /// Resolved absolute path when present.
    pub path: Option<PathBuf>,
    /// Version reported by `<tool> --version`, if it could be parsed.
    pub version: Option<String>,
}

impl ToolStatus {
    pub fn missing(tool: Tool) -> Self {
        Self {
            tool,
            path: None,
            version: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.path.is_some()
    }
}

/// Pull the first dotted version number out of `--version` output.
pub fn parse_version(output: &str) -> Option<String> {
    VERSION_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
