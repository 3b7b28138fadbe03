//! Per-platform provisioning pipeline.
//!
//! Each loaded platform goes through the same fixed sequence of stages,
//! strictly one after another. A failure anywhere aborts the whole run;
//! only an unsupported host is soft and reported as a skipped outcome.

mod artifacts;
mod context;
mod qemu;
mod steps;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::banner;
use crate::command::{CommandError, CommandRunner, Environment};
use crate::config::{self, Globals, PlatformConfig};
use crate::devices::RegistryError;
use crate::download::{DownloadError, Fetcher};
use crate::env_script::ScriptError;
use crate::github::GithubError;
use crate::host::HostInfo;
use crate::pool::Pool;
use crate::privilege::KeepAlive;
use crate::workspace::Workspace;

pub use self::context::PlatformContext;
pub use self::qemu::{random_mac, terminal_command};

/// Broad classes of fatal errors, as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Integrity,
    ExternalTool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{platform}: {message}")]
    Configuration { platform: String, message: String },

    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Github(#[from] GithubError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("I/O error at {1}")]
    Io(#[source] io::Error, PathBuf),
}

impl ProvisionError {
    pub(crate) fn configuration<P: Into<String>, M: Into<String>>(
        platform: P,
        message: M,
    ) -> ProvisionError {
        ProvisionError::Configuration {
            platform: platform.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        fn download_kind(e: &DownloadError) -> ErrorKind {
            match e {
                DownloadError::Integrity { .. } => ErrorKind::Integrity,
                DownloadError::InvalidUrl(_)
                | DownloadError::InvalidHeader(_)
                | DownloadError::CookieFile(..) => ErrorKind::Configuration,
                DownloadError::Checksum(_) | DownloadError::Io(..) | DownloadError::Persist(..) => {
                    ErrorKind::ExternalTool
                }
                _ => ErrorKind::Transport,
            }
        }

        match self {
            ProvisionError::Configuration { .. } | ProvisionError::Config(_) => {
                ErrorKind::Configuration
            }
            ProvisionError::Download(e) => download_kind(e),
            ProvisionError::Github(GithubError::Download(e)) => download_kind(e),
            ProvisionError::Github(GithubError::Archive(_))
            | ProvisionError::Github(GithubError::Io(..)) => ErrorKind::ExternalTool,
            ProvisionError::Github(_) => ErrorKind::Transport,
            ProvisionError::Registry(RegistryError::Json { .. }) => ErrorKind::Configuration,
            ProvisionError::Command(CommandError::Tokenize(_))
            | ProvisionError::Command(CommandError::Empty) => ErrorKind::Configuration,
            ProvisionError::Command(_)
            | ProvisionError::Registry(_)
            | ProvisionError::Script(_)
            | ProvisionError::Io(..) => ErrorKind::ExternalTool,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Named in the exclude list.
    Excluded,
    UnsupportedArch(String),
    UnsupportedHostType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOutcome {
    Provisioned,
    Skipped(SkipReason),
}

pub struct Provisioner {
    workspace: Workspace,
    host: HostInfo,
    runner: Arc<dyn CommandRunner>,
    keep_alive: KeepAlive,
    fetcher: Fetcher,
    pool: Pool,
    globals: Globals,
    exclude: Vec<String>,
    base_env: Environment,
    github_api: Option<String>,
}

impl Provisioner {
    pub fn new(workspace: Workspace, host: HostInfo, runner: Arc<dyn CommandRunner>) -> Provisioner {
        Provisioner {
            keep_alive: KeepAlive::new(runner.clone()),
            workspace,
            host,
            runner,
            fetcher: Fetcher::default(),
            pool: Pool::default(),
            globals: Globals::default(),
            exclude: vec![],
            base_env: Environment::from_process(),
            github_api: None,
        }
    }

    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Provisioner {
        self.keep_alive = keep_alive;
        self
    }

    pub fn fetcher(mut self, fetcher: Fetcher) -> Provisioner {
        self.fetcher = fetcher;
        self
    }

    pub fn pool(mut self, pool: Pool) -> Provisioner {
        self.pool = pool;
        self
    }

    pub fn globals(mut self, globals: Globals) -> Provisioner {
        self.globals = globals;
        self
    }

    /// Platform ids to skip.
    pub fn exclude<I, S>(mut self, ids: I) -> Provisioner
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Environment platforms start from instead of the process environment.
    pub fn base_env(mut self, env: Environment) -> Provisioner {
        self.base_env = env;
        self
    }

    /// API root used for GitHub artifacts.
    pub fn github_api<S: Into<String>>(mut self, api: S) -> Provisioner {
        self.github_api = Some(api.into());
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub(crate) fn refresh(&self) -> Result<(), ProvisionError> {
        Ok(self.keep_alive.refresh()?)
    }

    /// Provisions every loaded platform in order.
    pub fn provision_all(
        &self,
        platforms: &[PlatformConfig],
    ) -> Result<Vec<(String, PlatformOutcome)>, ProvisionError> {
        let mut outcomes = vec![];

        for platform in platforms.iter().filter(|p| p.load) {
            let outcome = self.provision(platform)?;
            outcomes.push((platform.id.clone(), outcome));
            self.refresh()?;
        }

        log::info!("{}", banner("Platform Setup Complete"));
        Ok(outcomes)
    }

    fn gate(&self, platform: &PlatformConfig) -> Option<SkipReason> {
        if self.exclude.iter().any(|id| id == &platform.id) {
            log::info!("{}", banner(&format!("PLEX - {}", &platform.id)));
            return Some(SkipReason::Excluded);
        }

        if !platform.supports_arch(&self.host.arch) {
            log::warn!(
                "{}",
                banner(&format!("\"{}\" not supported on this machine", &platform.id))
            );
            return Some(SkipReason::UnsupportedArch(self.host.arch.clone()));
        }

        let host_key = self.host.platform_key();
        if !platform.supports_host_type(host_key) {
            log::warn!(
                "{}",
                banner(&format!(
                    "\"{}\" not supported on this host type",
                    &platform.id
                ))
            );
            return Some(SkipReason::UnsupportedHostType(host_key.to_string()));
        }

        None
    }

    /// Runs every stage for one platform.
    pub fn provision(&self, platform: &PlatformConfig) -> Result<PlatformOutcome, ProvisionError> {
        if let Some(reason) = self.gate(platform) {
            return Ok(PlatformOutcome::Skipped(reason));
        }

        log::info!(
            "{}",
            banner(&format!(
                "Setting up Platform {} - {}",
                &platform.id, &self.host.arch
            ))
        );

        let ctx = PlatformContext::new(self, platform)?;
        log::info!("Working Directory: {:?}", &ctx.dir);

        self.refresh()?;
        steps::write_config_snapshot(&ctx)?;
        self.refresh()?;
        artifacts::acquire(self, &ctx)?;
        self.refresh()?;
        steps::pre_requisites(self, &ctx)?;
        self.refresh()?;
        steps::docker(self, &ctx)?;
        self.refresh()?;
        steps::conditionals(self, &ctx, &platform.runtime.conditionals, &ctx.dir)?;
        self.refresh()?;
        qemu::wire(self, &ctx)?;
        self.refresh()?;
        steps::post_commands(self, &ctx)?;
        self.refresh()?;
        steps::register_device(self, &ctx)?;

        Ok(PlatformOutcome::Provisioned)
    }
}
