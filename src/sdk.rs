//! The workspace's Flutter SDK checkout and the engine runtime bundle that
//! custom devices load.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::archive::{self, ArchiveError};
use crate::banner;
use crate::command::{Command, CommandError, CommandRunner, Environment};
use crate::defaults;
use crate::devices;
use crate::download::{Acquired, DownloadError, Fetcher, Request};
use crate::host::HostInfo;
use crate::repos::git;
use crate::workspace::Workspace;

const FEATURES_DART: &str = "packages/flutter_tools/lib/src/features.dart";
const FEATURE_DECL: &str = "const Feature flutterCustomDevicesFeature";
const CUSTOM_DEVICES_FEATURE: &str = "const Feature flutterCustomDevicesFeature = Feature(
  name: 'Early support for custom device types',
  configSetting: 'enable-custom-devices',
  environmentOverride: 'FLUTTER_CUSTOM_DEVICES',
  master: FeatureChannelSetting(
    available: true,
  ),
  beta: FeatureChannelSetting(
    available: true,
  ),
  stable: FeatureChannelSetting(
    available: true,
  )
);";

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Missing Flutter SDK: {0} not found")]
    MissingSdk(PathBuf),

    #[error("No engine runtime is published for {0} hosts")]
    UnsupportedArch(String),

    #[error("Flutter did not provide {0}")]
    MissingIcuData(PathBuf),

    #[error("Could not locate the Flutter settings folder")]
    NoSettingsDir,

    #[error("I/O error at {1}")]
    Io(#[source] io::Error, PathBuf),
}

/// True for channel names (`master`, `beta`, `stable`) as opposed to tags
/// or commits.
pub fn is_channel(version: &str) -> bool {
    !version.is_empty() && version.chars().all(|c| c.is_ascii_alphabetic())
}

/// Where the embedder archive for `version` is published.
pub fn engine_url(base: &str, arch: &str, version: &str) -> Result<String, SdkError> {
    let base = base.trim_end_matches('/');
    match arch {
        "x86_64" => Ok(format!(
            "{}/{}/linux-x64/linux-x64-embedder",
            base, version
        )),
        "arm64" | "aarch64" => Ok(format!("{}/{}/linux-arm64/artifacts.zip", base, version)),
        other => Err(SdkError::UnsupportedArch(other.to_string())),
    }
}

/// Settings Flutter reads from its settings folder. Only the host's own
/// desktop target stays enabled.
pub fn settings_for(host_type: &str) -> Value {
    json!({
        "enable-web": false,
        "enable-android": false,
        "enable-ios": false,
        "enable-fuchsia": false,
        "enable-custom-devices": true,
        "enable-linux-desktop": host_type == "linux",
        "enable-macos-desktop": host_type == "darwin",
        "enable-windows-desktop": host_type == "windows",
    })
}

/// Rewrites the custom devices feature declaration of `features.dart` so the
/// feature is available on every channel.
pub fn enable_custom_devices_feature(source: &str) -> Option<String> {
    let start = source.find(FEATURE_DECL)?;
    let end = start + source[start..].find(");")? + 2;
    Some(format!(
        "{}{}{}",
        &source[..start],
        CUSTOM_DEVICES_FEATURE,
        &source[end..]
    ))
}

fn archive_name(file_name: &str) -> String {
    if file_name.ends_with(".zip") {
        file_name.to_string()
    } else {
        format!("{}.zip", file_name)
    }
}

pub struct Sdk<'a> {
    workspace: &'a Workspace,
    host: &'a HostInfo,
    runner: &'a dyn CommandRunner,
    env: Environment,
    engine_base: String,
}

impl<'a> Sdk<'a> {
    pub fn new(
        workspace: &'a Workspace,
        host: &'a HostInfo,
        runner: &'a dyn CommandRunner,
        base: &Environment,
    ) -> Sdk<'a> {
        Sdk {
            workspace,
            host,
            runner,
            env: workspace.environment(base),
            engine_base: defaults::ENGINE_BASE_URL.to_string(),
        }
    }

    pub fn with_engine_base<S: Into<String>>(mut self, base: S) -> Sdk<'a> {
        self.engine_base = base.into();
        self
    }

    pub fn dir(&self) -> PathBuf {
        self.workspace.flutter_sdk_dir()
    }

    fn run(&self, line: &str, cwd: &Path) -> Result<(), SdkError> {
        let command = self.env.command(line)?.cwd(cwd).env(&self.env);
        Ok(self.runner.run(&command)?)
    }

    fn git(&self, args: &[&str], cwd: &Path) -> Result<(), SdkError> {
        Ok(self.runner.run(&git(args, cwd).env(&self.env))?)
    }

    /// Clones the SDK on first use and checks out `version`. Channels are
    /// upgraded afterwards.
    pub fn checkout(&self, version: &str) -> Result<PathBuf, SdkError> {
        log::info!("{}", banner(&format!("Flutter Version: {}", version)));
        let dir = self.dir();

        if dir.join(".git").exists() {
            self.git(&["reset", "--hard"], &dir)?;
        } else {
            if dir.exists() {
                log::debug!("Removing stale {:?}", &dir);
                fs::remove_dir_all(&dir).map_err(|e| SdkError::Io(e, dir.clone()))?;
            }
            let target = dir.to_string_lossy();
            self.git(
                &["clone", defaults::FLUTTER_REPO, &*target],
                self.workspace.root(),
            )?;
        }

        log::info!("Checking out {}", version);
        self.git(&["checkout", version], &dir)?;

        let snapshot = dir.join("bin/cache/flutter_tools.snapshot");
        if snapshot.exists() {
            log::info!("{}", banner("Cleaning Flutter Tool"));
            fs::remove_file(&snapshot).map_err(|e| SdkError::Io(e, snapshot.clone()))?;
        }

        if version != defaults::FLUTTER_CHANNEL && self.host.is_linux() {
            self.patch_features(&dir)?;
        }

        if is_channel(version) {
            log::info!("{}", banner(&format!("Upgrading `{}` Channel", version)));
            self.run(&format!("flutter upgrade {}", version), &dir)?;
        }

        log::info!("{}", banner(&format!("FLUTTER_SDK: {}", dir.display())));
        Ok(dir)
    }

    fn patch_features(&self, dir: &Path) -> Result<(), SdkError> {
        let path = dir.join(FEATURES_DART);
        let source = match fs::read_to_string(&path) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("{:?} not found, custom devices left as shipped", &path);
                return Ok(());
            }
            Err(e) => return Err(SdkError::Io(e, path)),
        };

        match enable_custom_devices_feature(&source) {
            Some(patched) if patched != source => {
                log::info!("{}", banner("Patching Flutter SDK"));
                fs::write(&path, patched).map_err(|e| SdkError::Io(e, path.clone()))
            }
            Some(_) => Ok(()),
            None => {
                log::warn!("No custom devices feature in {:?}", &path);
                Ok(())
            }
        }
    }

    /// Writes Flutter's settings file and turns analytics off.
    pub fn configure(&self) -> Result<(), SdkError> {
        let dir = devices::settings_dir(&self.env).ok_or(SdkError::NoSettingsDir)?;
        fs::create_dir_all(&dir).map_err(|e| SdkError::Io(e, dir.clone()))?;

        let path = dir.join(defaults::FLUTTER_SETTINGS_FILE);
        let settings = serde_json::to_vec_pretty(&settings_for(&self.host.host_type))
            .map_err(|e| SdkError::Io(e.into(), path.clone()))?;
        fs::write(&path, settings).map_err(|e| SdkError::Io(e, path.clone()))?;
        log::debug!("Wrote {:?}", &path);

        let cwd = self.workspace.root();
        for line in &[
            "flutter config --no-analytics",
            "dart --disable-analytics",
            "flutter doctor",
        ] {
            self.run(line, cwd)?;
        }
        Ok(())
    }

    /// Shows the registered custom devices.
    pub fn list_devices(&self) -> Result<(), SdkError> {
        self.run("flutter custom-devices list", self.workspace.root())
    }

    /// Engine commit the checked out SDK was built against.
    pub fn engine_version(&self) -> Result<String, SdkError> {
        let path = self.dir().join("bin/internal/engine.version");
        match fs::read_to_string(&path) {
            Ok(v) => {
                let version = v.trim().to_string();
                log::info!("Engine Version: {}", &version);
                Ok(version)
            }
            Err(_) => Err(SdkError::MissingSdk(path)),
        }
    }

    fn icu_data(&self) -> PathBuf {
        self.dir().join(format!(
            "bin/cache/artifacts/engine/{}-x64/icudtl.dat",
            &self.host.host_type
        ))
    }

    /// Downloads the embedder for the SDK's engine and lays out
    /// `BUNDLE_FOLDER` with its `lib` and `data` folders. `clean` wipes an
    /// existing bundle first.
    pub fn fetch_engine(&self, fetcher: &Fetcher, clean: bool) -> Result<PathBuf, SdkError> {
        let version = self.engine_version()?;
        let url = engine_url(&self.engine_base, &self.host.arch, &version)?;
        let request = Request::parse(&url)?;
        let archive_path = self
            .workspace
            .engine_dir()
            .join(&version)
            .join(archive_name(&request.file_name()?));

        let acquired = fetcher.acquire_to(&request, archive_path, None)?;
        match &acquired {
            Acquired::Cached(_) => log::info!("{}", banner("Skipping Engine artifact download")),
            Acquired::Downloaded(_) => log::info!("{}", banner("Downloaded Engine artifact")),
        }

        let bundle = self.workspace.bundle_dir();
        if clean && bundle.exists() {
            fs::remove_dir_all(&bundle).map_err(|e| SdkError::Io(e, bundle.clone()))?;
        }
        let lib = bundle.join("lib");
        let data = bundle.join("data");
        for dir in [&lib, &data] {
            fs::create_dir_all(dir).map_err(|e| SdkError::Io(e, dir.clone()))?;
        }

        let icu = self.icu_data();
        if !icu.exists() {
            self.run("flutter doctor -v", &self.dir())?;
        }
        if !icu.exists() {
            return Err(SdkError::MissingIcuData(icu));
        }
        let icu_dest = data.join("icudtl.dat");
        fs::copy(&icu, &icu_dest).map_err(|e| SdkError::Io(e, icu_dest.clone()))?;

        archive::unzip(acquired.path(), &lib)?;
        if self.host.is_linux() {
            let header = lib.join("flutter_embedder.h");
            if header.exists() {
                fs::remove_file(&header).map_err(|e| SdkError::Io(e, header.clone()))?;
            }
        }

        log::info!("BUNDLE_FOLDER: {:?}", &bundle);
        Ok(bundle)
    }
}
