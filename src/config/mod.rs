//! Workspace configuration: globals, repositories and platform entries.
//!
//! Configuration is either a directory holding `_globals.json`,
//! `_repos.json` and one JSON file per platform, or a single document of the
//! form `{"globals": .., "repos": [..], "platforms": [..]}`. Every platform
//! entry is validated before any of them is turned into a typed value.

mod globals;
mod platform;
pub mod validate;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

pub use self::globals::{Globals, RepoEntry};
pub use self::platform::*;

const GLOBALS_FILE: &str = "_globals.json";
const REPOS_FILE: &str = "_repos.json";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration not found at {0}")]
    NotFound(PathBuf),

    #[error("Could not read {1}")]
    Read(#[source] io::Error, PathBuf),

    #[error("Invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing '{key}' key in platform config {platform}")]
    MissingKey { platform: String, key: String },

    #[error("Missing '{key}' key in custom-device config of {platform}")]
    MissingDeviceKey { platform: String, key: &'static str },

    #[error("platform type {ty} is not currently supported ({platform})")]
    UnsupportedType { platform: String, ty: String },

    #[error("Artifact {endpoint} of {platform} declares more than one checksum")]
    MultipleDigests { platform: String, endpoint: String },

    #[error("Platform id {0} is declared more than once")]
    DuplicateId(String),

    #[error("Invalid platform config {platform}")]
    Invalid {
        platform: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {0}")]
    Section(&'static str, #[source] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub globals: Globals,
    pub repos: Vec<RepoEntry>,
    pub platforms: Vec<PlatformConfig>,
}

/// A platform entry as read from disk, before validation.
#[derive(Debug, Clone)]
pub struct RawPlatform {
    pub source: PathBuf,
    pub value: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Aggregate {
    #[serde(default)]
    globals: Option<Value>,
    #[serde(default)]
    repos: Option<Value>,
    #[serde(default)]
    platforms: Vec<Value>,
}

impl WorkspaceConfig {
    /// Loads, validates and types the configuration at `path`.
    pub fn load(path: &Path) -> Result<WorkspaceConfig, Error> {
        let (globals, repos, platforms) = if path.is_dir() {
            read_dir(path)?
        } else if path.is_file() {
            read_aggregate(path)?
        } else {
            return Err(Error::NotFound(path.to_path_buf()));
        };

        validate::platforms(&platforms)?;

        let globals: Globals = match globals {
            Some(Value::Null) | None => Globals::default(),
            Some(v) => serde_json::from_value(v).map_err(|e| Error::Section("globals", e))?,
        };
        let repos: Vec<RepoEntry> = match repos {
            Some(Value::Null) | None => vec![],
            Some(v) => serde_json::from_value(v).map_err(|e| Error::Section("repos", e))?,
        };

        let platforms = platforms
            .into_iter()
            .map(|raw| {
                let name = validate::describe(&raw);
                serde_json::from_value::<PlatformConfig>(raw.value).map_err(|source| {
                    Error::Invalid {
                        platform: name,
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Loaded {} platforms and {} repos from {:?}",
            platforms.len(),
            repos.len(),
            path
        );

        Ok(WorkspaceConfig {
            globals,
            repos,
            platforms,
        })
    }

    pub fn platform(&self, id: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Platforms marked `load: true`, in declaration order.
    pub fn loaded_platforms(&self) -> impl Iterator<Item = &PlatformConfig> {
        self.platforms.iter().filter(|p| p.load)
    }

    pub fn platform_ids(&self) -> Vec<&str> {
        self.loaded_platforms().map(|p| p.id.as_str()).collect()
    }
}

fn read_json(path: &Path) -> Result<Value, Error> {
    let contents = fs::read_to_string(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
    serde_json::from_str(&contents).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

type Sections = (Option<Value>, Option<Value>, Vec<RawPlatform>);

fn read_dir(dir: &Path) -> Result<Sections, Error> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| Error::Read(e, dir.to_path_buf()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "json"))
        .collect::<Vec<_>>();
    files.sort();

    let mut globals = None;
    let mut repos = None;
    let mut platforms = vec![];

    for path in files {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let value = read_json(&path)?;
        match name {
            GLOBALS_FILE => globals = Some(value),
            REPOS_FILE => repos = Some(value),
            _ => platforms.push(RawPlatform {
                source: path.clone(),
                value,
            }),
        }
    }

    Ok((globals, repos, platforms))
}

fn read_aggregate(path: &Path) -> Result<Sections, Error> {
    let aggregate: Aggregate =
        serde_json::from_value(read_json(path)?).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let platforms = aggregate
        .platforms
        .into_iter()
        .map(|value| RawPlatform {
            source: path.to_path_buf(),
            value,
        })
        .collect();

    Ok((aggregate.globals, aggregate.repos, platforms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generic(id: &str, load: bool) -> Value {
        json!({
            "id": id,
            "load": load,
            "type": "generic",
            "supported_archs": ["x86_64", "arm64"],
            "supported_host_types": ["ubuntu", "darwin"],
            "runtime": {}
        })
    }

    #[test]
    fn directory_layout_is_read_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("_globals.json"),
            r#"{"flutter-version": "3.10.0", "github_token": "abc"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("_repos.json"),
            r#"[{"uri": "https://github.com/foo/gallery.git", "branch": "main"}]"#,
        )
        .unwrap();
        fs::write(dir.path().join("b-desktop.json"), generic("desktop", true).to_string()).unwrap();
        fs::write(dir.path().join("a-disabled.json"), generic("disabled", false).to_string())
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(config.globals.flutter_version.as_deref(), Some("3.10.0"));
        assert_eq!(config.repos.len(), 1);

        let ids: Vec<_> = config.platforms.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["disabled", "desktop"]);
        assert_eq!(config.platform_ids(), vec!["desktop"]);
    }

    #[test]
    fn aggregate_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let doc = json!({
            "globals": {"cookie_file": "/tmp/cookies.txt"},
            "platforms": [generic("desktop", true)]
        });
        fs::write(&path, doc.to_string()).unwrap();

        let config = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(
            config.globals.cookie_file.as_deref(),
            Some(Path::new("/tmp/cookies.txt"))
        );
        assert!(config.repos.is_empty());
        assert!(config.platform("desktop").is_some());
    }

    #[test]
    fn invalid_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        match WorkspaceConfig::load(dir.path()) {
            Err(Error::Json { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unloaded_entries_are_still_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = generic("broken", false);
        broken.as_object_mut().unwrap().remove("runtime");
        fs::write(dir.path().join("broken.json"), broken.to_string()).unwrap();
        fs::write(dir.path().join("ok.json"), generic("ok", true).to_string()).unwrap();

        assert!(matches!(
            WorkspaceConfig::load(dir.path()),
            Err(Error::MissingKey { key, .. }) if key == "runtime"
        ));
    }

    #[test]
    fn missing_path() {
        assert!(matches!(
            WorkspaceConfig::load(Path::new("/nonexistent/flutter-workspace")),
            Err(Error::NotFound(_))
        ));
    }
}
