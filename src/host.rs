use std::path::Path;

use indexmap::IndexMap;

use crate::defaults;

/// What the provisioner needs to know about the machine it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Machine architecture, e.g. `x86_64` or `arm64`.
    pub arch: String,
    /// `linux`, `darwin` or `windows`.
    pub host_type: String,
    /// `ID` from `/etc/os-release` on Linux hosts.
    pub distro: Option<String>,
    pub kvm_capable: bool,
}

impl HostInfo {
    pub fn detect() -> HostInfo {
        let host_type = defaults::host_type().to_string();
        let (distro, kvm_capable) = if host_type == "linux" {
            let distro = read_os_release(Path::new(defaults::OS_RELEASE_PATH))
                .and_then(|mut release| release.remove("ID"));
            let kvm = std::fs::read_to_string("/proc/cpuinfo")
                .map(|info| cpu_has_virtualization(&info))
                .unwrap_or(false);
            (distro, kvm)
        } else {
            (None, false)
        };

        let info = HostInfo {
            arch: defaults::machine_arch().to_string(),
            host_type,
            distro,
            kvm_capable,
        };
        log::debug!("Detected host: {:?}", &info);
        info
    }

    pub fn new<A: Into<String>, T: Into<String>>(arch: A, host_type: T) -> HostInfo {
        HostInfo {
            arch: arch.into(),
            host_type: host_type.into(),
            distro: None,
            kvm_capable: false,
        }
    }

    pub fn with_distro<S: Into<String>>(mut self, distro: S) -> HostInfo {
        self.distro = Some(distro.into());
        self
    }

    /// Key used for host-specific configuration: the distro id on Linux,
    /// the host type everywhere else.
    pub fn platform_key(&self) -> &str {
        match (&*self.host_type, &self.distro) {
            ("linux", Some(distro)) => distro,
            _ => &self.host_type,
        }
    }

    pub fn is_linux(&self) -> bool {
        self.host_type == "linux"
    }

    pub fn is_darwin(&self) -> bool {
        self.host_type == "darwin"
    }

    /// `x86_64` becomes `x86-64`, as used in SDK name strings.
    pub fn arch_hyphen(&self) -> String {
        self.arch.replace('_', "-")
    }

    /// Architecture name QEMU binaries use.
    pub fn formal_arch(&self) -> &str {
        match &*self.arch {
            "arm64" => "aarch64",
            other => other,
        }
    }
}

pub(crate) fn read_os_release(path: &Path) -> Option<IndexMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(v) => Some(parse_os_release(&v)),
        Err(e) => {
            log::warn!("Could not read {:?}: {}", path, e);
            None
        }
    }
}

pub(crate) fn parse_os_release(contents: &str) -> IndexMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

fn cpu_has_virtualization(cpuinfo: &str) -> bool {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("flags"))
        .any(|line| line.split_whitespace().any(|f| f == "vmx" || f == "svm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_strips_quotes_and_comments() {
        let release = parse_os_release(
            "# comment\nNAME=\"Ubuntu\"\nID=ubuntu\n\nVERSION_ID=\"22.04\"\n",
        );
        assert_eq!(release.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(release.get("NAME").map(String::as_str), Some("Ubuntu"));
        assert_eq!(release.len(), 3);
    }

    #[test]
    fn platform_key_prefers_distro_on_linux() {
        let host = HostInfo::new("x86_64", "linux").with_distro("fedora");
        assert_eq!(host.platform_key(), "fedora");

        let host = HostInfo::new("arm64", "darwin");
        assert_eq!(host.platform_key(), "darwin");
        assert_eq!(host.formal_arch(), "aarch64");
    }

    #[test]
    fn kvm_detection_reads_flags_only() {
        assert!(cpu_has_virtualization("processor : 0\nflags : fpu vme vmx sse\n"));
        assert!(!cpu_has_virtualization("model name : vmx-like cpu\nflags : fpu sse\n"));
    }
}
