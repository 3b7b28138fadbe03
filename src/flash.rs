//! Flashing downloaded images onto a device in fastboot mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::banner;
use crate::command::{Command, CommandError, CommandRunner, Environment};
use crate::config::{ArtifactEntry, PlatformConfig};
use crate::defaults;
use crate::download::{self, DownloadError};
use crate::host::HostInfo;
use crate::workspace::Workspace;

#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Invalid artifact URL for {platform}")]
    Url {
        platform: String,
        #[source]
        source: DownloadError,
    },

    #[error("No fastboot device showed up after {0} attempts")]
    NoDevice(u32),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
}

/// One partition to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    pub partition: String,
    pub path: PathBuf,
}

fn sudo(args: &[&str], cwd: &Path, env: &Environment) -> Command {
    Command::new("sudo").args(args.iter().copied()).cwd(cwd).env(env)
}

pub struct Flasher<'a> {
    runner: &'a dyn CommandRunner,
    host: &'a HostInfo,
    polls: u32,
    delay: Duration,
}

impl<'a> Flasher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, host: &'a HostInfo) -> Flasher<'a> {
        Flasher {
            runner,
            host,
            polls: defaults::FASTBOOT_POLLS,
            delay: defaults::FASTBOOT_POLL_DELAY,
        }
    }

    /// How often and how far apart `fastboot devices` is asked for a device.
    pub fn polling(mut self, polls: u32, delay: Duration) -> Flasher<'a> {
        self.polls = polls.max(1);
        self.delay = delay;
        self
    }

    /// Flashes every platform named in `ids`, in configuration order.
    pub fn flash_all(
        &self,
        workspace: &Workspace,
        platforms: &[PlatformConfig],
        ids: &[String],
        base: &Environment,
    ) -> Result<(), FlashError> {
        if let Some(missing) = ids.iter().find(|id| !platforms.iter().any(|p| &p.id == *id)) {
            return Err(FlashError::UnknownPlatform(missing.clone()));
        }

        for platform in platforms.iter().filter(|p| ids.contains(&p.id)) {
            self.flash(workspace, platform, base)?;
        }
        Ok(())
    }

    /// Images of `platform` for this host that are on disk and name a
    /// partition.
    pub fn images(
        &self,
        platform: &PlatformConfig,
        dir: &Path,
        env: &Environment,
    ) -> Result<Vec<FlashImage>, FlashError> {
        let http = match platform
            .runtime
            .artifacts
            .as_ref()
            .and_then(|a| a.http.as_ref())
        {
            Some(v) => v,
            None => return Ok(vec![]),
        };

        let mut images = vec![];
        for entry in http.for_arch(&self.host.arch) {
            if let Some(image) = image(platform, entry, http.url.as_deref(), dir, env)? {
                images.push(image);
            }
        }
        Ok(images)
    }

    /// Reboots the device into the bootloader and writes each image.
    /// Returns `false` when the platform has nothing to flash on this host.
    pub fn flash(
        &self,
        workspace: &Workspace,
        platform: &PlatformConfig,
        base: &Environment,
    ) -> Result<bool, FlashError> {
        let dir = workspace.platform_dir(&platform.id);
        let env = platform_env(workspace, platform, base, &dir);

        let images = self.images(platform, &dir, &env)?;
        if images.is_empty() {
            log::warn!("{} has no fastboot images for {}", &platform.id, &self.host.arch);
            return Ok(false);
        }

        log::info!("{}", banner(&format!("Updating image by fastboot from {}", dir.display())));

        self.runner.run(&sudo(&["adb", "reboot", "bootloader"], &dir, &env))?;
        self.wait_for_device(&dir, &env)?;

        for image in &images {
            log::info!("Flashing {:?} to {}", &image.path, &image.partition);
            let path = image.path.to_string_lossy().into_owned();
            self.runner.run(&sudo(
                &["fastboot", "flash", image.partition.as_str(), path.as_str()],
                &dir,
                &env,
            ))?;
        }

        self.runner.run(&sudo(&["fastboot", "reboot"], &dir, &env))?;
        Ok(true)
    }

    fn wait_for_device(&self, dir: &Path, env: &Environment) -> Result<(), FlashError> {
        for attempt in 1..=self.polls {
            let out = self
                .runner
                .output(&sudo(&["fastboot", "devices"], dir, env))?;
            if out.lines().any(|line| !line.trim().is_empty()) {
                log::debug!("Fastboot device listed on attempt {}", attempt);
                return Ok(());
            }

            if attempt < self.polls {
                log::debug!("No fastboot device yet, waiting {:?}", self.delay);
                std::thread::sleep(self.delay);
            }
        }
        Err(FlashError::NoDevice(self.polls))
    }
}

fn platform_env(
    workspace: &Workspace,
    platform: &PlatformConfig,
    base: &Environment,
    dir: &Path,
) -> Environment {
    let mut env = workspace.environment(base);
    env.set_path("PLATFORM_ID_DIR", dir);
    for (key, value) in &platform.env {
        let value = env.expand(value);
        env.set(key.clone(), value);
    }
    env
}

fn image(
    platform: &PlatformConfig,
    entry: &ArtifactEntry,
    base: Option<&str>,
    dir: &Path,
    env: &Environment,
) -> Result<Option<FlashImage>, FlashError> {
    let partition = match &entry.partition {
        Some(v) => v,
        None => return Ok(None),
    };

    let url = env.expand(&entry.raw_url(base));
    let name = url::Url::parse(&url)
        .map_err(|_| DownloadError::InvalidUrl(url.clone()))
        .and_then(|u| download::file_name(&u))
        .map_err(|source| FlashError::Url {
            platform: platform.id.clone(),
            source,
        })?;

    let path = dir.join(name);
    if !path.is_file() {
        log::warn!("{:?} does not exist, not flashing {}", &path, partition);
        return Ok(None);
    }

    Ok(Some(FlashImage {
        partition: partition.clone(),
        path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    struct Fastboot {
        log: Mutex<Vec<String>>,
        empty_polls: Mutex<u32>,
    }

    impl Fastboot {
        fn new(empty_polls: u32) -> Fastboot {
            Fastboot {
                log: Mutex::new(vec![]),
                empty_polls: Mutex::new(empty_polls),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl CommandRunner for Fastboot {
        fn run(&self, command: &Command) -> Result<(), CommandError> {
            self.log.lock().unwrap().push(command.to_string());
            Ok(())
        }

        fn output(&self, command: &Command) -> Result<String, CommandError> {
            self.run(command)?;
            let mut left = self.empty_polls.lock().unwrap();
            if *left == 0 {
                Ok("0123456789ABCDEF\tfastboot\n".into())
            } else {
                *left -= 1;
                Ok(String::new())
            }
        }
    }

    fn platform() -> PlatformConfig {
        serde_json::from_value(serde_json::json!({
            "id": "rockchip",
            "load": true,
            "type": "generic",
            "supported_archs": ["x86_64"],
            "supported_host_types": ["ubuntu"],
            "env": { "IMAGES": "https://example.com/images" },
            "runtime": {
                "artifacts": {
                    "http": {
                        "artifacts": {
                            "x86_64": [
                                { "endpoint": "boot", "url": "${IMAGES}/boot.img", "partition": "boot" },
                                { "endpoint": "rootfs", "url": "${IMAGES}/rootfs.img", "partition": "rootfs" },
                                { "endpoint": "readme", "url": "${IMAGES}/README" },
                                { "endpoint": "vendor", "url": "${IMAGES}/vendor.img", "partition": "vendor" }
                            ]
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn flashes_present_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let platform_dir = workspace.platform_dir("rockchip");
        fs::create_dir_all(&platform_dir).unwrap();
        fs::write(platform_dir.join("boot.img"), b"boot").unwrap();
        fs::write(platform_dir.join("rootfs.img"), b"rootfs").unwrap();
        fs::write(platform_dir.join("README"), b"docs").unwrap();

        let host = HostInfo::new("x86_64", "linux");
        let runner = Fastboot::new(2);
        let flasher = Flasher::new(&runner, &host).polling(5, Duration::from_millis(0));

        assert!(flasher
            .flash(&workspace, &platform(), &Environment::new())
            .unwrap());

        let boot = platform_dir.join("boot.img");
        let rootfs = platform_dir.join("rootfs.img");
        assert_eq!(
            runner.log(),
            vec![
                "sudo adb reboot bootloader".to_string(),
                "sudo fastboot devices".to_string(),
                "sudo fastboot devices".to_string(),
                "sudo fastboot devices".to_string(),
                format!("sudo fastboot flash boot {}", boot.display()),
                format!("sudo fastboot flash rootfs {}", rootfs.display()),
                "sudo fastboot reboot".to_string(),
            ]
        );
    }

    #[test]
    fn gives_up_when_no_device_appears() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let platform_dir = workspace.platform_dir("rockchip");
        fs::create_dir_all(&platform_dir).unwrap();
        fs::write(platform_dir.join("boot.img"), b"boot").unwrap();

        let host = HostInfo::new("x86_64", "linux");
        let runner = Fastboot::new(10);
        let flasher = Flasher::new(&runner, &host).polling(3, Duration::from_millis(0));

        let err = flasher
            .flash(&workspace, &platform(), &Environment::new())
            .unwrap_err();
        assert!(matches!(err, FlashError::NoDevice(3)));
        assert!(!runner.log().iter().any(|l| l.contains("flash boot")));
    }

    #[test]
    fn other_arch_has_nothing_to_flash() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let host = HostInfo::new("arm64", "darwin");
        let runner = Fastboot::new(0);

        let flashed = Flasher::new(&runner, &host)
            .flash(&workspace, &platform(), &Environment::new())
            .unwrap();
        assert!(!flashed);
        assert!(runner.log().is_empty());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostInfo::new("x86_64", "linux");
        let runner = Fastboot::new(0);

        let err = Flasher::new(&runner, &host)
            .flash_all(
                &Workspace::new(dir.path()),
                &[platform()],
                &["nope".to_string()],
                &Environment::new(),
            )
            .unwrap_err();
        assert!(matches!(err, FlashError::UnknownPlatform(id) if id == "nope"));
    }
}
