use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::checksum::Expected;
use crate::devices::DeviceTemplate;

/// One declared target platform.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub id: String,
    pub load: bool,
    pub supported_archs: Vec<String>,
    pub supported_host_types: Vec<String>,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub flutter_runtime: Option<String>,
    /// Dotenv files applied, in order, before `env`.
    #[serde(default)]
    pub dotenv: Vec<PathBuf>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(flatten)]
    pub kind: PlatformKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlatformKind {
    Generic(GenericSection),
    Qemu(DeviceSection),
    Docker(DeviceSection),
    Host(DeviceSection),
    Remote(DeviceSection),
}

impl PlatformKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlatformKind::Generic(_) => "generic",
            PlatformKind::Qemu(_) => "qemu",
            PlatformKind::Docker(_) => "docker",
            PlatformKind::Host(_) => "host",
            PlatformKind::Remote(_) => "remote",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSection {
    #[serde(rename = "custom-device", alias = "custom_device")]
    pub custom_device: DeviceTemplate,
    #[serde(rename = "overwrite-existing", alias = "overwrite_existing", default)]
    pub overwrite_existing: bool,
}

/// A `generic` entry may still declare a device.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "GenericFields")]
pub struct GenericSection {
    pub device: Option<DeviceSection>,
}

#[derive(Deserialize)]
struct GenericFields {
    #[serde(rename = "custom-device", alias = "custom_device", default)]
    custom_device: Option<DeviceTemplate>,
    #[serde(rename = "overwrite-existing", alias = "overwrite_existing", default)]
    overwrite_existing: bool,
}

impl From<GenericFields> for GenericSection {
    fn from(fields: GenericFields) -> GenericSection {
        GenericSection {
            device: fields.custom_device.map(|custom_device| DeviceSection {
                custom_device,
                overwrite_existing: fields.overwrite_existing,
            }),
        }
    }
}

impl PlatformConfig {
    pub fn device(&self) -> Option<&DeviceSection> {
        match &self.kind {
            PlatformKind::Generic(g) => g.device.as_ref(),
            PlatformKind::Qemu(d)
            | PlatformKind::Docker(d)
            | PlatformKind::Host(d)
            | PlatformKind::Remote(d) => Some(d),
        }
    }

    /// `runtime.flutter_runtime`, falling back to the top-level key.
    pub fn flutter_runtime(&self) -> Option<&str> {
        self.runtime
            .flutter_runtime
            .as_deref()
            .or(self.flutter_runtime.as_deref())
    }

    pub fn supports_arch(&self, arch: &str) -> bool {
        self.supported_archs.iter().any(|a| a == arch)
    }

    pub fn supports_host_type(&self, host_type: &str) -> bool {
        self.supported_host_types.iter().any(|h| h == host_type)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Runtime {
    /// Written verbatim as the platform's config snapshot.
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub artifacts: Option<ArtifactSection>,
    #[serde(rename = "pre-requisites", alias = "pre_requisites", default)]
    pub pre_requisites: Option<PreRequisites>,
    #[serde(default)]
    pub docker: Option<DockerSection>,
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
    #[serde(default)]
    pub qemu: Option<QemuSection>,
    #[serde(default)]
    pub post_cmds: Vec<CommandGroup>,
    #[serde(default)]
    pub flutter_runtime: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactSection {
    #[serde(default)]
    pub http: Option<HttpArtifacts>,
    #[serde(default)]
    pub github: Option<GithubArtifacts>,
    #[serde(default)]
    pub netrc: Option<NetrcSection>,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpArtifacts {
    /// Base URL each entry's `endpoint` is appended to.
    #[serde(default)]
    pub url: Option<String>,
    /// Entries keyed by host architecture.
    #[serde(default)]
    pub artifacts: IndexMap<String, Vec<ArtifactEntry>>,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

impl HttpArtifacts {
    pub fn for_arch(&self, arch: &str) -> &[ArtifactEntry] {
        self.artifacts.get(arch).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactEntry {
    #[serde(default)]
    pub url: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Fastboot partition this artifact is flashed to.
    #[serde(default)]
    pub partition: Option<String>,
}

impl ArtifactEntry {
    /// Unexpanded URL: the entry's own `url` or `base` followed by the
    /// endpoint.
    pub fn raw_url(&self, base: Option<&str>) -> String {
        match (&self.url, base) {
            (Some(url), _) => url.clone(),
            (None, Some(base)) => format!("{}{}", base, self.endpoint),
            (None, None) => self.endpoint.clone(),
        }
    }

    pub fn expected(&self) -> Option<Expected> {
        if let Some(v) = &self.sha256 {
            Some(Expected::Sha256(v.clone()))
        } else if let Some(v) = &self.sha1 {
            Some(Expected::Sha1(v.clone()))
        } else {
            self.md5.as_ref().map(|v| Expected::Md5(v.clone()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubArtifacts {
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    pub artifact_names: Vec<String>,
    #[serde(default)]
    pub post_process: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetrcSection {
    pub machine: String,
}

/// `pre-requisites[arch][host]`.
pub type PreRequisites = IndexMap<String, IndexMap<String, HostSteps>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostSteps {
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
    #[serde(default)]
    pub cmds: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerSection {
    /// Directory holding the compose file.
    #[serde(rename = "docker-compose-yml-dir", alias = "docker_compose_yml_dir", default)]
    pub compose_dir: Option<String>,
    #[serde(default)]
    pub post_cmds: Vec<String>,
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
}

/// Commands that run only while `path` does not exist.
#[derive(Debug, Clone, Deserialize)]
pub struct Conditional {
    pub path: String,
    #[serde(default)]
    pub cmds: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandGroup {
    #[serde(default)]
    pub cmds: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Host-keyed sections; only their `env` is used.
    #[serde(flatten)]
    pub hosts: IndexMap<String, Value>,
}

impl CommandGroup {
    /// Environment overrides for `host_key`, in declaration order.
    pub fn env_for(&self, host_key: &str) -> Vec<(String, String)> {
        self.hosts
            .get(host_key)
            .and_then(|section| section.get("env"))
            .and_then(Value::as_object)
            .map(|env| {
                env.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QemuSection {
    pub cmd: String,
    /// Extra arguments keyed by host type.
    #[serde(default)]
    pub extra: Option<IndexMap<String, String>>,
    #[serde(flatten)]
    pub archs: IndexMap<String, QemuArch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QemuArch {
    #[serde(default)]
    pub kernel: Option<String>,
    pub image: String,
    #[serde(default)]
    pub args: String,
}
