//! Required-key checks over raw platform documents.
//!
//! Runs before anything is provisioned: one incomplete entry aborts the run,
//! including entries that are not loaded.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{Error, RawPlatform};

pub const UNIVERSAL_KEYS: [&str; 5] = [
    "id",
    "load",
    "type",
    "supported_archs",
    "supported_host_types",
];

pub const DEVICE_KEYS: [&str; 14] = [
    "id",
    "label",
    "sdkNameAndVersion",
    "platform",
    "enabled",
    "ping",
    "pingSuccessRegex",
    "postBuild",
    "install",
    "uninstall",
    "runDebug",
    "forwardPort",
    "forwardPortSuccessRegex",
    "screenshot",
];

const DIGEST_KEYS: [&str; 3] = ["md5", "sha1", "sha256"];

/// Keys also accepted with hyphens in place of underscores.
const HYPHENATED: [&str; 3] = ["custom_device", "overwrite_existing", "pre_requisites"];

/// Keys a platform of the given type needs beyond the universal ones.
/// Dotted names refer to keys inside `runtime`.
pub fn required_keys(ty: &str) -> Option<&'static [&'static str]> {
    Some(match ty {
        "generic" => &["runtime"],
        "qemu" => &[
            "runtime",
            "runtime.config",
            "runtime.artifacts",
            "runtime.qemu",
            "custom_device",
        ],
        "docker" | "host" | "remote" => &[
            "runtime",
            "runtime.flutter_runtime",
            "custom_device",
            "overwrite_existing",
        ],
        _ => return None,
    })
}

fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| {
        if HYPHENATED.iter().any(|k| *k == key) {
            obj.get(&key.replace('_', "-"))
        } else {
            None
        }
    })
}

fn has_key(obj: &Map<String, Value>, key: &str) -> bool {
    match key {
        // Also accepted at the platform top level.
        "runtime.flutter_runtime" => {
            lookup(obj, "flutter_runtime").is_some()
                || runtime(obj).map_or(false, |r| lookup(r, "flutter_runtime").is_some())
        }
        _ => match key.split_once('.') {
            Some((parent, child)) => lookup(obj, parent)
                .and_then(Value::as_object)
                .map_or(false, |parent| lookup(parent, child).is_some()),
            None => lookup(obj, key).is_some(),
        },
    }
}

fn runtime(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    lookup(obj, "runtime").and_then(Value::as_object)
}

/// Human readable name for diagnostics: the id when there is one.
pub fn describe(raw: &RawPlatform) -> String {
    match raw.value.get("id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => raw.source.display().to_string(),
    }
}

pub fn platform(raw: &RawPlatform) -> Result<(), Error> {
    let name = describe(raw);
    let missing = |key: &str| Error::MissingKey {
        platform: name.clone(),
        key: key.to_string(),
    };

    let obj = raw.value.as_object().ok_or_else(|| missing("id"))?;

    for key in UNIVERSAL_KEYS.iter() {
        if !has_key(obj, key) {
            return Err(missing(*key));
        }
    }

    let ty = obj.get("type").and_then(Value::as_str).unwrap_or_default();
    let required = required_keys(ty).ok_or_else(|| Error::UnsupportedType {
        platform: name.clone(),
        ty: obj["type"].to_string().trim_matches('"').to_string(),
    })?;

    for key in required.iter() {
        if !has_key(obj, key) {
            return Err(missing(*key));
        }
    }

    if required.contains(&"custom_device") || has_key(obj, "custom_device") {
        device_template(&name, lookup(obj, "custom_device"))?;
    }

    digests(&name, obj)?;

    log::debug!("Platform ID: {}", &name);
    Ok(())
}

fn device_template(platform: &str, template: Option<&Value>) -> Result<(), Error> {
    let template = template.and_then(Value::as_object);
    for key in DEVICE_KEYS.iter() {
        if template.map_or(true, |t| !t.contains_key(*key)) {
            return Err(Error::MissingDeviceKey {
                platform: platform.to_string(),
                key: *key,
            });
        }
    }
    Ok(())
}

fn digests(platform: &str, obj: &Map<String, Value>) -> Result<(), Error> {
    let per_arch = runtime(obj)
        .and_then(|r| lookup(r, "artifacts"))
        .and_then(|a| a.get("http"))
        .and_then(|h| h.get("artifacts"))
        .and_then(Value::as_object);

    let entries = per_arch
        .into_iter()
        .flat_map(|archs| archs.values())
        .filter_map(Value::as_array)
        .flatten();

    for entry in entries {
        let declared = DIGEST_KEYS
            .iter()
            .filter(|k| entry.get(**k).map_or(false, |v| !v.is_null()))
            .count();
        if declared > 1 {
            return Err(Error::MultipleDigests {
                platform: platform.to_string(),
                endpoint: entry
                    .get("endpoint")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>")
                    .to_string(),
            });
        }
    }
    Ok(())
}

/// Validates every entry, then checks ids are unique.
pub fn platforms(raws: &[RawPlatform]) -> Result<(), Error> {
    for raw in raws {
        platform(raw)?;
    }

    let mut seen = HashSet::new();
    for raw in raws {
        let id = describe(raw);
        if !seen.insert(id.clone()) {
            return Err(Error::DuplicateId(id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn raw(value: Value) -> RawPlatform {
        RawPlatform {
            source: PathBuf::from("platform.json"),
            value,
        }
    }

    fn device() -> Value {
        let mut map = Map::new();
        for key in DEVICE_KEYS.iter() {
            map.insert(key.to_string(), Value::Null);
        }
        map.insert("id".into(), json!("qemu-x86"));
        Value::Object(map)
    }

    fn qemu() -> Value {
        json!({
            "id": "qemu-x86",
            "load": true,
            "type": "qemu",
            "supported_archs": ["x86_64"],
            "supported_host_types": ["ubuntu"],
            "custom-device": device(),
            "runtime": {
                "config": null,
                "artifacts": {},
                "qemu": {"cmd": "qemu-system-x86_64"}
            }
        })
    }

    fn remove(value: &mut Value, path: &str) {
        match path.split_once('.') {
            Some((parent, child)) => {
                value[parent].as_object_mut().unwrap().remove(child);
            }
            None => {
                let obj = value.as_object_mut().unwrap();
                obj.remove(path);
                obj.remove(&path.replace('_', "-"));
            }
        }
    }

    #[test]
    fn qemu_fails_iff_a_required_key_is_missing() {
        assert!(platform(&raw(qemu())).is_ok());

        for key in required_keys("qemu").unwrap() {
            let mut value = qemu();
            remove(&mut value, key);
            match platform(&raw(value)) {
                Err(Error::MissingKey { key: k, .. }) => assert_eq!(k, *key),
                other => panic!("{} removed: {:?}", key, other),
            }
        }
    }

    #[test]
    fn universal_keys_are_required() {
        for key in UNIVERSAL_KEYS.iter() {
            let mut value = qemu();
            remove(&mut value, key);
            assert!(platform(&raw(value)).is_err(), "{}", key);
        }
    }

    #[test]
    fn flutter_runtime_may_live_in_runtime_or_top_level() {
        let base = json!({
            "id": "host",
            "load": true,
            "type": "host",
            "supported_archs": ["x86_64"],
            "supported_host_types": ["ubuntu"],
            "custom_device": device(),
            "overwrite_existing": false,
            "runtime": {}
        });
        assert!(matches!(
            platform(&raw(base.clone())),
            Err(Error::MissingKey { key, .. }) if key == "runtime.flutter_runtime"
        ));

        let mut top = base.clone();
        top["flutter_runtime"] = json!("release");
        assert!(platform(&raw(top)).is_ok());

        let mut nested = base;
        nested["runtime"]["flutter_runtime"] = json!("debug");
        assert!(platform(&raw(nested)).is_ok());
    }

    #[test]
    fn device_template_needs_every_key() {
        let mut value = qemu();
        value["custom-device"]
            .as_object_mut()
            .unwrap()
            .remove("screenshot");
        assert!(matches!(
            platform(&raw(value)),
            Err(Error::MissingDeviceKey { key: "screenshot", .. })
        ));
    }

    #[test]
    fn generic_device_is_checked_when_declared() {
        let mut value = json!({
            "id": "desktop-auto",
            "load": true,
            "type": "generic",
            "supported_archs": ["x86_64"],
            "supported_host_types": ["ubuntu"],
            "runtime": {}
        });
        assert!(platform(&raw(value.clone())).is_ok());

        value["custom-device"] = device();
        assert!(platform(&raw(value.clone())).is_ok());

        value["custom-device"].as_object_mut().unwrap().remove("runDebug");
        assert!(matches!(
            platform(&raw(value)),
            Err(Error::MissingDeviceKey { key: "runDebug", .. })
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut value = qemu();
        value["type"] = json!("wasm");
        assert!(matches!(
            platform(&raw(value)),
            Err(Error::UnsupportedType { ty, .. }) if ty == "wasm"
        ));
    }

    #[test]
    fn two_digests_on_one_entry() {
        let mut value = qemu();
        value["runtime"]["artifacts"] = json!({
            "http": {"artifacts": {"x86_64": [
                {"endpoint": "/a.img", "md5": "x"},
                {"endpoint": "/b.img", "md5": "x", "sha256": "y"}
            ]}}
        });
        match platform(&raw(value)) {
            Err(Error::MultipleDigests { endpoint, .. }) => assert_eq!(endpoint, "/b.img"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn duplicate_ids() {
        let raws = vec![raw(qemu()), raw(qemu())];
        assert!(matches!(platforms(&raws), Err(Error::DuplicateId(id)) if id == "qemu-x86"));
    }
}
