use std::time::Duration;

pub const WORKSPACE_ENV: &str = "FLUTTER_WORKSPACE";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const SSH_PORT_ENV: &str = "CONTAINER_SSH_PORT";

pub const GITHUB_API: &str = "https://api.github.com";
pub const FLUTTER_REPO: &str = "https://github.com/flutter/flutter.git";
pub const ENGINE_BASE_URL: &str = "https://storage.googleapis.com/flutter_infra_release/flutter";

/// Channel checked out when neither the command line nor the globals name
/// a Flutter version.
pub const FLUTTER_CHANNEL: &str = "master";

pub const DOWNLOAD_ATTEMPTS: u32 = 3;
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REDIRECTS: usize = 255;

pub const FASTBOOT_POLLS: u32 = 5;
pub const FASTBOOT_POLL_DELAY: Duration = Duration::from_secs(2);

pub const PLATFORM_CONFIG_FILE: &str = "default_config.json";
pub const FLUTTER_SETTINGS_FILE: &str = "settings";
pub const ENGINE_STATE_ID: &str = "flutter-engine";
pub const ENV_SCRIPT_FILE: &str = "setup_env.sh";
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

macro_rules! host_type {
    ($os:expr, $name:expr) => {{
        #[cfg(target_os = $os)]
        {
            return $name;
        }
    }};
}

/// Host type as platform entries name it in `supported_host_types`.
#[inline(always)]
#[allow(unreachable_code)]
pub const fn host_type() -> &'static str {
    host_type!("linux", "linux");
    host_type!("macos", "darwin");
    host_type!("windows", "windows");
    "unknown"
}

macro_rules! arch {
    ($arch:expr, $name:expr) => {{
        #[cfg(target_arch = $arch)]
        {
            return $name;
        }
    }};
}

/// Machine architecture using the kernel's naming, so `arm64` on Apple
/// silicon and `aarch64` on Linux.
#[inline(always)]
#[allow(unreachable_code)]
pub const fn machine_arch() -> &'static str {
    arch!("x86_64", "x86_64");
    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    {
        return "arm64";
    }
    arch!("aarch64", "aarch64");
    arch!("arm", "armv7l");
    arch!("x86", "i686");
    arch!("riscv64", "riscv64");
    "unknown"
}

/// Worker count used when no explicit pool size is configured.
pub fn pool_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    std::cmp::min(32, cpus + 4)
}
