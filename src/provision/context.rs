use std::fs;
use std::path::{Path, PathBuf};

use crate::command::{Command, Environment};
use crate::config::PlatformConfig;

use super::{ProvisionError, Provisioner};

/// Everything a stage needs to know about the platform being provisioned.
///
/// Built once per platform and never mutated; stages that need extra
/// variables work on a clone of `env`.
#[derive(Debug, Clone)]
pub struct PlatformContext<'a> {
    pub platform: &'a PlatformConfig,
    /// `<workspace>/.config/flutter_workspace/<id>`, the working directory
    /// of every stage.
    pub dir: PathBuf,
    /// Distro id on Linux, host type elsewhere.
    pub host_key: String,
    pub env: Environment,
}

impl<'a> PlatformContext<'a> {
    pub fn new(
        provisioner: &Provisioner,
        platform: &'a PlatformConfig,
    ) -> Result<PlatformContext<'a>, ProvisionError> {
        let workspace = provisioner.workspace();
        let host = provisioner.host();
        let dir = workspace.platform_dir(&platform.id);
        fs::create_dir_all(&dir).map_err(|e| ProvisionError::Io(e, dir.clone()))?;

        let mut env = workspace.environment(&provisioner.base_env);
        env.set_path("PLATFORM_ID_DIR", &dir);
        env.set("PLATFORM_ID_DIR_RELATIVE", format!(".{}", &platform.id));
        env.set_path("BUNDLE_FOLDER", &workspace.bundle_dir());
        env.set("MACHINE_ARCH", host.arch.clone());
        env.set("MACHINE_ARCH_HYPHEN", host.arch_hyphen());
        if let Some(runtime) = platform.flutter_runtime() {
            env.set("FLUTTER_RUNTIME", runtime);
        }

        for file in &platform.dotenv {
            let path = PathBuf::from(env.expand(&file.to_string_lossy()));
            load_dotenv(&mut env, &path, &platform.id)?;
        }

        for (key, value) in &platform.env {
            let value = env.expand(value);
            log::debug!("{}={}", key, &value);
            env.set(key.clone(), value);
        }

        Ok(PlatformContext {
            platform,
            dir,
            host_key: host.platform_key().to_string(),
            env,
        })
    }

    pub fn id(&self) -> &str {
        &self.platform.id
    }

    /// Expands and splits `line` into a command running in `cwd` with `env`.
    pub fn command_in(
        &self,
        line: &str,
        cwd: &Path,
        env: &Environment,
    ) -> Result<Command, ProvisionError> {
        Ok(env.command(line)?.cwd(cwd).env(env))
    }

    pub fn command(&self, line: &str) -> Result<Command, ProvisionError> {
        self.command_in(line, &self.dir, &self.env)
    }
}

/// Adds the variables of a dotenv file to `env`. Variables `env` already
/// holds keep their value.
fn load_dotenv(env: &mut Environment, path: &Path, platform: &str) -> Result<(), ProvisionError> {
    if !path.is_file() {
        log::warn!("Dotenv file {:?} of {} does not exist", path, platform);
        return Ok(());
    }

    // The non-deprecated loaders write into the process environment.
    #[allow(deprecated)]
    let iter = dotenv::from_path_iter(path).map_err(|e| {
        ProvisionError::configuration(platform, format!("Could not read {:?}: {}", path, e))
    })?;

    for item in iter {
        let (key, value) = item.map_err(|e| {
            ProvisionError::configuration(platform, format!("Invalid line in {:?}: {}", path, e))
        })?;
        if env.contains(&key) {
            log::debug!("{} already set, ignoring the value from {:?}", &key, path);
            continue;
        }
        env.set(key, value);
    }

    log::info!("Loaded: {:?}", path);
    Ok(())
}
