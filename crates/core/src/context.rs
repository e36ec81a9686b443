//! Explicit execution context threaded through every deploy phase.
//!
//! Holds what a shell script would keep in ambient process state: the
//! resolved base directory, the tool search path (inherited `PATH` plus
//! locations discovered during provisioning), resolved tool binaries and
//! the operator console. The process environment itself is never mutated.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::console::Console;
use crate::layout::AppLayout;
use crate::subprocess::CommandSpec;
use crate::tools::Tool;

#[derive(Debug)]
pub struct ExecutionContext {
    pub layout: AppLayout,
    /// Home directory of the deploying user; anchors installer fallbacks.
    pub home: Option<PathBuf>,
    /// Login name of the deploying user.
    pub user: Option<String>,
    /// `PATH` as inherited from the caller.
    inherited_path: Option<OsString>,
    /// Locations prepended to the search path, most recent first.
    extra_paths: Vec<PathBuf>,
    resolved: BTreeMap<Tool, PathBuf>,
    is_root: bool,
    pub console: Console,
}

impl ExecutionContext {
    pub fn new(layout: AppLayout, console: Console) -> Self {
        Self {
            layout,
            home: std::env::var_os("HOME").map(PathBuf::from),
            user: std::env::var("USER").ok(),
            inherited_path: std::env::var_os("PATH"),
            extra_paths: Vec::new(),
            resolved: BTreeMap::new(),
            is_root: effective_uid_is_root(),
            console,
        }
    }

    /// Replace the inherited `PATH` (tests use this to isolate lookups).
    pub fn with_inherited_path(mut self, path: Option<OsString>) -> Self {
        self.inherited_path = path;
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.layout.base
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Add a directory to the tool search path for the rest of the run.
    pub fn extend_search_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.extra_paths.contains(&dir) {
            tracing::debug!(dir = %dir.display(), "Extending tool search path");
            self.extra_paths.insert(0, dir);
        }
    }

    pub fn extra_paths(&self) -> &[PathBuf] {
        &self.extra_paths
    }

    /// Effective search path: extra locations first, then the inherited `PATH`.
    pub fn search_path(&self) -> OsString {
        let inherited = self
            .inherited_path
            .as_ref()
            .map(std::env::split_paths)
            .into_iter()
            .flatten();
        let all: Vec<PathBuf> = self.extra_paths.iter().cloned().chain(inherited).collect();
        std::env::join_paths(all).unwrap_or_default()
    }

    pub fn record_tool(&mut self, tool: Tool, path: PathBuf) {
        self.resolved.insert(tool, path);
    }

    pub fn tool_path(&self, tool: Tool) -> Option<&Path> {
        self.resolved.get(&tool).map(PathBuf::as_path)
    }

    /// Resolved binary for `tool`, or its bare name when not yet probed.
    pub fn program(&self, tool: Tool) -> PathBuf {
        self.tool_path(tool)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(tool.binary()))
    }

    /// A command running in the base directory with the context's search path.
    pub fn command(&self, program: impl Into<PathBuf>) -> CommandSpec {
        CommandSpec::new(program)
            .env("PATH", self.search_path().to_string_lossy().into_owned())
            .current_dir(&self.layout.base)
    }

    /// Like [`command`](Self::command), but prefixed with `sudo` when the
    /// deploying user is not root.
    pub fn elevated_command(&self, program: impl Into<PathBuf>) -> CommandSpec {
        let program = program.into();
        if self.is_root {
            self.command(program)
        } else {
            self.command("sudo")
                .arg("-E")
                .arg(program.to_string_lossy().into_owned())
        }
    }
}

fn effective_uid_is_root() -> bool {
    // Safety: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
