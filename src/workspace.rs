use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::command::Environment;
use crate::defaults;
use crate::devices::{Registry, REGISTRY_FILE};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Could not create {1}")]
    Create(#[source] io::Error, PathBuf),

    #[error("Could not remove {1}")]
    Remove(#[source] io::Error, PathBuf),
}

/// Paths of a workspace rooted at one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new<P: Into<PathBuf>>(root: P) -> Workspace {
        Workspace { root: root.into() }
    }

    /// `FLUTTER_WORKSPACE` from `env`, otherwise the current directory.
    pub fn from_env(env: &Environment) -> io::Result<Workspace> {
        match env.get(defaults::WORKSPACE_ENV) {
            Some(v) if !v.is_empty() => Ok(Workspace::new(v)),
            _ => std::env::current_dir().map(Workspace::new),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(".config")
    }

    /// Flutter's settings folder; `XDG_CONFIG_HOME` points here.
    pub fn flutter_settings_dir(&self) -> PathBuf {
        self.config_dir().join("flutter")
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.flutter_settings_dir().join(REGISTRY_FILE))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config_dir().join("flutter_workspace")
    }

    pub fn platform_dir(&self, id: &str) -> PathBuf {
        self.state_dir().join(id)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn pub_cache(&self) -> PathBuf {
        self.state_dir().join("pub_cache")
    }

    /// Engine archives, one folder per engine version.
    pub fn engine_dir(&self) -> PathBuf {
        self.platform_dir(defaults::ENGINE_STATE_ID)
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.engine_dir().join("bundle")
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn flutter_sdk_dir(&self) -> PathBuf {
        self.root.join("flutter")
    }

    pub fn vscode_dir(&self) -> PathBuf {
        self.root.join(".vscode")
    }

    pub fn env_script(&self) -> PathBuf {
        self.root.join(defaults::ENV_SCRIPT_FILE)
    }

    pub fn apple_script(&self, platform_id: &str) -> PathBuf {
        self.root.join(format!("run-{}.scpt", platform_id))
    }

    pub fn create(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::Create(e, self.root.clone()))
    }

    /// `base` with the workspace variables every platform starts from.
    pub fn environment(&self, base: &Environment) -> Environment {
        let mut env = base.clone();
        env.set_path(defaults::WORKSPACE_ENV, &self.root);

        let bin = self.flutter_sdk_dir().join("bin");
        let path = match base.get("PATH") {
            Some(p) if !p.is_empty() => format!("{}:{}", p, bin.display()),
            _ => bin.display().to_string(),
        };
        env.set("PATH", path);
        env.set_path("PUB_CACHE", &self.pub_cache());
        env.set_path("XDG_CONFIG_HOME", &self.flutter_settings_dir());
        env
    }

    /// Removes everything provisioning created. Artifact caches go with
    /// `.config`.
    pub fn clean(&self) -> Result<(), WorkspaceError> {
        log::info!("Cleaning workspace {:?}", &self.root);

        let mut files = vec![self.env_script(), self.root.join("qemu_run.scpt")];
        if let Ok(entries) = fs::read_dir(&self.root) {
            files.extend(
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| is_launcher_script(p)),
            );
        }
        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => log::debug!("Removed {:?}", &file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(WorkspaceError::Remove(e, file)),
            }
        }

        for dir in [
            self.config_dir(),
            self.app_dir(),
            self.flutter_sdk_dir(),
            self.vscode_dir(),
        ] {
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| WorkspaceError::Remove(e, dir.clone()))?;
                log::debug!("Removed {:?}", &dir);
            }
        }
        Ok(())
    }
}

fn is_launcher_script(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with("run-") && n.ends_with(".scpt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let ws = Workspace::new("/ws");
        assert_eq!(ws.platform_dir("qemu"), Path::new("/ws/.config/flutter_workspace/qemu"));
        assert_eq!(
            ws.bundle_dir(),
            Path::new("/ws/.config/flutter_workspace/flutter-engine/bundle")
        );
        assert_eq!(
            ws.registry().path(),
            Path::new("/ws/.config/flutter/custom_devices.json")
        );
        assert_eq!(ws.apple_script("qemu"), Path::new("/ws/run-qemu.scpt"));
    }

    #[test]
    fn environment_appends_sdk_bin_to_path() {
        let ws = Workspace::new("/ws");
        let env = ws.environment(&Environment::new().with("PATH", "/usr/bin"));
        assert_eq!(env.get("FLUTTER_WORKSPACE"), Some("/ws"));
        assert_eq!(env.get("PATH"), Some("/usr/bin:/ws/flutter/bin"));
        assert_eq!(env.get("XDG_CONFIG_HOME"), Some("/ws/.config/flutter"));
        assert_eq!(
            env.get("PUB_CACHE"),
            Some("/ws/.config/flutter_workspace/pub_cache")
        );
    }

    #[test]
    fn clean_wipes_generated_state_only() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        fs::create_dir_all(ws.platform_dir("qemu")).unwrap();
        fs::create_dir_all(ws.app_dir().join("gallery")).unwrap();
        fs::write(ws.env_script(), "#!/bin/bash").unwrap();
        fs::write(ws.apple_script("qemu"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "keep").unwrap();

        ws.clean().unwrap();
        assert!(!ws.config_dir().exists());
        assert!(!ws.app_dir().exists());
        assert!(!ws.env_script().exists());
        assert!(!ws.apple_script("qemu").exists());
        assert!(dir.path().join("notes.md").exists());
    }
}
