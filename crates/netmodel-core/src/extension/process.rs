//! Process delegation for extension actions.

use futures::future::BoxFuture;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Environment variable naming the marshaled call file.
pub const ARGFILE_ENV: &str = "NETMODEL_ARGFILE";
/// Environment variable naming the (initially empty) return file.
pub const RETFILE_ENV: &str = "NETMODEL_RETFILE";
/// Environment variable naming the evaluated pid file path.
pub const PIDFILE_ENV: &str = "NETMODEL_PIDFILE";

/// One command to run, with its environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDelegate {
    command: String,
    env: Vec<(String, String)>,
}

impl ProcessDelegate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn getenv(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets a variable, replacing an earlier value.
    pub fn setenv(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.env.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.env.push((name, value)),
        }
    }

    /// Sets a variable from a `NAME=value` assignment.
    pub fn putenv(&mut self, assignment: &str) -> bool {
        match assignment.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                self.setenv(name, value);
                true
            }
            _ => false,
        }
    }
}

/// Resolves once the spawned process exits. Dropping it before then kills
/// the process.
pub type ProcessExit = BoxFuture<'static, io::Result<ExitStatus>>;

/// Spawns delegated processes.
pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, delegate: &ProcessDelegate) -> io::Result<ProcessExit>;
}

/// Runs commands through `/bin/sh -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl ProcessExecutor for ShellExecutor {
    fn spawn(&self, delegate: &ProcessDelegate) -> io::Result<ProcessExit> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(delegate.command())
            .envs(delegate.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::pin(async move { child.wait().await }))
    }
}
