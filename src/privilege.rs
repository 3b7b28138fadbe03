use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::{Command, CommandError, CommandRunner};

/// Keeps the `sudo` credential cache warm across long runs.
#[derive(Clone)]
pub struct KeepAlive {
    runner: Arc<dyn CommandRunner>,
    enabled: bool,
}

impl std::fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlive")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl KeepAlive {
    pub fn new(runner: Arc<dyn CommandRunner>) -> KeepAlive {
        KeepAlive {
            runner,
            enabled: true,
        }
    }

    /// A keep-alive that never invokes `sudo`.
    pub fn disabled(runner: Arc<dyn CommandRunner>) -> KeepAlive {
        KeepAlive {
            runner,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Drops any cached credential and asks for a fresh one, reading the
    /// password from `stdin_file` when given.
    pub fn acquire(&self, stdin_file: Option<&Path>) -> Result<(), CommandError> {
        if !self.enabled {
            return Ok(());
        }

        self.runner.run(&Command::new("sudo").arg("-k"))?;
        let validate = match stdin_file {
            Some(path) => Command::new("sudo")
                .args(["-S", "-v"])
                .stdin_file(PathBuf::from(path)),
            None => Command::new("sudo").arg("-v"),
        };
        self.runner.run(&validate)
    }

    pub fn refresh(&self) -> Result<(), CommandError> {
        if !self.enabled {
            return Ok(());
        }
        log::trace!("Refreshing sudo timestamp");
        self.runner.run(&Command::new("sudo").arg("-v").quiet())
    }
}
