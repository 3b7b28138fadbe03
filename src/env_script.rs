//! The `setup_env.sh` activation script users source to enter a workspace.
//!
//! The header is rewritten from scratch on every run. Each platform with an
//! emulator launcher owns a block delimited by marker lines; provisioning
//! the platform again replaces that block in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const HEADER: &str = r#"#!/usr/bin/env bash -l

pushd . > '/dev/null'
SCRIPT_PATH="${BASH_SOURCE[0]:-$0}"

while [ -h "$SCRIPT_PATH" ]
do
    cd "$( dirname -- "$SCRIPT_PATH"; )"
    SCRIPT_PATH="$( readlink -f -- "$SCRIPT_PATH"; )"
done
cd "$( dirname -- "$SCRIPT_PATH"; )" > '/dev/null'

SCRIPT_PATH="$( pwd; )"
popd  > '/dev/null'
echo SCRIPT_PATH=$SCRIPT_PATH

export FLUTTER_WORKSPACE=$SCRIPT_PATH
export PATH=$FLUTTER_WORKSPACE/flutter/bin:$PATH
export PUB_CACHE=$FLUTTER_WORKSPACE/.config/flutter_workspace/pub_cache
export XDG_CONFIG_HOME=$FLUTTER_WORKSPACE/.config/flutter

echo "********************************************"
echo "* Setting FLUTTER_WORKSPACE to:"
echo "* ${FLUTTER_WORKSPACE}"
echo "********************************************"

flutter doctor -v
flutter custom-devices list
"#;

#[derive(Debug, thiserror::Error)]
#[error("Could not update activation script {1}")]
pub struct ScriptError(#[source] io::Error, PathBuf);

#[derive(Debug, Clone)]
pub struct ActivationScript {
    path: PathBuf,
}

fn begin_marker(id: &str) -> String {
    format!("# >>> run-{} >>>", id)
}

fn end_marker(id: &str) -> String {
    format!("# <<< run-{} <<<", id)
}

/// Shell function `run-<id>` that starts `command` unless something already
/// listens on `port`.
pub fn launcher(id: &str, port: &str, command: &str) -> String {
    format!(
        r#"echo "********************************************"
echo "* Type 'run-{id}' to start"
echo "********************************************"
run-{id}() {{
    if [[ $( (echo >/dev/tcp/localhost/{port}) &>/dev/null; echo $?) -eq 0 ]];
    then
        echo 'port {port} is already in use'
    else
        {command}
    fi
}}
"#,
        id = id,
        port = port,
        command = command
    )
}

/// Strips the marked block for `id` out of `script`.
fn without_block(script: &str, id: &str) -> String {
    let begin = begin_marker(id);
    let end = end_marker(id);
    let mut out = String::with_capacity(script.len());
    let mut inside = false;

    for line in script.lines() {
        if line == begin {
            inside = true;
        } else if inside && line == end {
            inside = false;
        } else if !inside {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

impl ActivationScript {
    pub fn new<P: Into<PathBuf>>(path: P) -> ActivationScript {
        ActivationScript { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, e: io::Error) -> ScriptError {
        ScriptError(e, self.path.clone())
    }

    /// Starts a fresh script holding only the header.
    pub fn write_header(&self) -> Result<(), ScriptError> {
        fs::write(&self.path, HEADER).map_err(|e| self.err(e))?;
        set_executable(&self.path).map_err(|e| self.err(e))?;
        log::debug!("Wrote {:?}", &self.path);
        Ok(())
    }

    /// Replaces the block of `id` with `body`, or appends it.
    pub fn set_block(&self, id: &str, body: &str) -> Result<(), ScriptError> {
        let current = match fs::read_to_string(&self.path) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HEADER.to_string(),
            Err(e) => return Err(self.err(e)),
        };

        let mut script = without_block(&current, id);
        script.push_str(&begin_marker(id));
        script.push('\n');
        script.push_str(body);
        if !body.ends_with('\n') {
            script.push('\n');
        }
        script.push_str(&end_marker(id));
        script.push('\n');

        fs::write(&self.path, script).map_err(|e| self.err(e))?;
        log::info!("Added run-{} to {:?}", id, &self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprovisioning_replaces_the_block() {
        let dir = tempfile::tempdir().unwrap();
        let script = ActivationScript::new(dir.path().join("setup_env.sh"));
        script.write_header().unwrap();

        script
            .set_block("qemu", &launcher("qemu", "2222", "qemu-system-x86_64 -m 1024"))
            .unwrap();
        script
            .set_block("pi", &launcher("pi", "2223", "true"))
            .unwrap();
        script
            .set_block("qemu", &launcher("qemu", "2222", "qemu-system-x86_64 -m 4096"))
            .unwrap();

        let contents = fs::read_to_string(script.path()).unwrap();
        assert!(contents.starts_with("#!/usr/bin/env bash -l"));
        assert_eq!(contents.matches("run-qemu() {").count(), 1);
        assert!(contents.contains("-m 4096"));
        assert!(!contents.contains("-m 1024"));
        assert!(contents.contains("run-pi() {"));
        assert!(contents.find("run-pi()").unwrap() < contents.find("run-qemu()").unwrap());
    }

    #[test]
    fn launcher_checks_the_port() {
        let text = launcher("agl", "2222", "echo hi");
        assert!(text.contains("/dev/tcp/localhost/2222"));
        assert!(text.contains("echo 'port 2222 is already in use'"));
        assert!(text.contains("run-agl() {"));
    }
}
