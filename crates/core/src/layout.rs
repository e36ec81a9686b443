//! Filesystem layout of a deployed application checkout.
//!
//! All paths hang off the resolved base directory, never the caller's
//! current directory.

use std::path::{Path, PathBuf};

pub const LOG_DIR: &str = "logs";
pub const DATA_DIR: &str = "data";
pub const ARCHIVE_DIR: &str = "data/archive";
pub const CONFIG_DIR: &str = "config";
pub const CONFIG_FILE: &str = "config/user_settings.json";
pub const CONFIG_TEMPLATE: &str = "config/user_settings.example.json";
pub const VENV_DIR: &str = ".venv";

/// Files whose presence marks a directory as the application root.
pub const ROOT_MARKERS: [&str; 2] = ["pyproject.toml", "app.py"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    pub base: PathBuf,
    pub logs: PathBuf,
    pub data: PathBuf,
    pub archive: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub config_template: PathBuf,
    pub venv: PathBuf,
    pub descriptor: PathBuf,
}

impl AppLayout {
    pub fn new(base: impl Into<PathBuf>, descriptor_file: &str) -> Self {
        let base = base.into();
        Self {
            logs: base.join(LOG_DIR),
            data: base.join(DATA_DIR),
            archive: base.join(ARCHIVE_DIR),
            config_dir: base.join(CONFIG_DIR),
            config_file: base.join(CONFIG_FILE),
            config_template: base.join(CONFIG_TEMPLATE),
            venv: base.join(VENV_DIR),
            descriptor: base.join(descriptor_file),
            base,
        }
    }

    /// Directories the workspace initializer guarantees, parents first.
    pub fn required_dirs(&self) -> [&Path; 4] {
        [&self.logs, &self.data, &self.archive, &self.config_dir]
    }
}

/// Find the application root for an executable living at `exe`.
///
/// Walks up from the executable's directory and returns the first ancestor
/// containing the process descriptor or one of [`ROOT_MARKERS`]. Falls back
/// to the executable's own directory.
pub fn resolve_base_dir(exe: &Path, descriptor_file: &str) -> Option<PathBuf> {
    let start = exe.parent()?;
    let found = start.ancestors().find(|dir| {
        dir.join(descriptor_file).is_file()
            || ROOT_MARKERS.iter().any(|marker| dir.join(marker).is_file())
    });
    Some(found.unwrap_or(start).to_path_buf())
}
