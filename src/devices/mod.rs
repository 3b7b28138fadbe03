//! The Flutter custom devices file and the descriptors kept in it.

mod descriptor;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::command::Environment;

pub use self::descriptor::{CommandLine, DeviceDescriptor, DeviceTemplate};

pub const REGISTRY_FILE: &str = "custom_devices.json";
const DEVICES_KEY: &str = "custom-devices";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Could not read {1}")]
    Read(#[source] io::Error, PathBuf),

    #[error("Invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not write {1}")]
    Write(#[source] io::Error, PathBuf),
}

/// Flutter's settings folder: `XDG_CONFIG_HOME` when set, otherwise
/// `~/.config/flutter`.
pub fn settings_dir(env: &Environment) -> Option<PathBuf> {
    match env.get("XDG_CONFIG_HOME") {
        Some(v) if !v.is_empty() => Some(PathBuf::from(v)),
        _ => BaseDirs::new().map(|x| x.home_dir().join(".config").join("flutter")),
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new<P: Into<PathBuf>>(path: P) -> Registry {
        Registry { path: path.into() }
    }

    /// The registry inside the settings folder `env` points at.
    pub fn from_env(env: &Environment) -> Option<Registry> {
        settings_dir(env).map(|dir| Registry::new(dir.join(REGISTRY_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Map<String, Value>, RegistryError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| RegistryError::Read(e, self.path.clone()))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents).map_err(|source| RegistryError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn entries(doc: &Map<String, Value>) -> &[Value] {
        doc.get(DEVICES_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rewrites the device list of `doc`, keeping its other keys.
    fn retain<F>(doc: &mut Map<String, Value>, keep: F) -> usize
    where
        F: Fn(&Value) -> bool,
    {
        let mut list = match doc.remove(DEVICES_KEY) {
            Some(Value::Array(list)) => list,
            _ => vec![],
        };
        let before = list.len();
        list.retain(|e| keep(e));
        let removed = before - list.len();
        doc.insert(DEVICES_KEY.to_string(), Value::Array(list));
        removed
    }

    fn id_of(entry: &Value) -> Option<&str> {
        entry.get("id").and_then(Value::as_str)
    }

    fn write(&self, doc: &Map<String, Value>) -> Result<(), RegistryError> {
        let err = |e: io::Error| RegistryError::Write(e, self.path.clone());
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(err)?;
        {
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut tmp, formatter);
            doc.serialize(&mut ser)
                .map_err(|e| err(io::Error::new(io::ErrorKind::Other, e)))?;
        }
        tmp.write_all(b"\n").map_err(err)?;
        tmp.as_file().sync_all().map_err(err)?;
        tmp.persist(&self.path).map_err(|e| err(e.error))?;
        Ok(())
    }

    /// Every entry that parses as a descriptor.
    pub fn devices(&self) -> Result<Vec<DeviceDescriptor>, RegistryError> {
        let doc = self.read()?;
        Ok(Registry::entries(&doc)
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect())
    }

    pub fn ids(&self) -> Result<Vec<String>, RegistryError> {
        let doc = self.read()?;
        Ok(Registry::entries(&doc)
            .iter()
            .filter_map(|v| Registry::id_of(v).map(str::to_string))
            .collect())
    }

    /// Replaces any entry with the same id, appending `device` last.
    pub fn upsert(&self, device: &DeviceDescriptor) -> Result<(), RegistryError> {
        let mut doc = self.read()?;
        let value = serde_json::to_value(device).map_err(|source| RegistryError::Json {
            path: self.path.clone(),
            source,
        })?;

        Registry::retain(&mut doc, |e| Registry::id_of(e) != Some(device.id.as_str()));
        if let Some(Value::Array(list)) = doc.get_mut(DEVICES_KEY) {
            list.push(value);
        }

        log::info!("Registering custom device {} in {:?}", &device.id, &self.path);
        self.write(&doc)
    }

    /// Removes entries with `id`. A registry left empty is deleted.
    pub fn remove(&self, id: &str) -> Result<usize, RegistryError> {
        if !self.path.exists() {
            return Ok(0);
        }

        let mut doc = self.read()?;
        let removed = Registry::retain(&mut doc, |e| Registry::id_of(e) != Some(id));

        if Registry::entries(&doc).is_empty() {
            log::info!("Removing empty file: {:?}", &self.path);
            fs::remove_file(&self.path).map_err(|e| RegistryError::Write(e, self.path.clone()))?;
        } else if removed > 0 {
            self.write(&doc)?;
        }

        log::debug!("Removed {} entries with id {}", removed, id);
        Ok(removed)
    }
}
