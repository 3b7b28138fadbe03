//! Application repositories checked out under `<workspace>/app`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::banner;
use crate::command::{Command, CommandError, CommandRunner};
use crate::config::RepoEntry;
use crate::pool::{self, Pool};
use crate::privilege::KeepAlive;
use crate::workspace::Workspace;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error at {1}")]
    Io(#[source] io::Error, PathBuf),

    #[error("Could not serialize {1}")]
    Json(#[source] serde_json::Error, PathBuf),
}

pub(crate) fn git(args: &[&str], cwd: &Path) -> Command {
    Command::new("git").args(args.iter().copied()).cwd(cwd)
}

/// Clones or updates one repository inside `app_dir`. Entries without a
/// uri or branch are skipped.
pub fn sync(
    app_dir: &Path,
    repo: &RepoEntry,
    runner: &dyn CommandRunner,
) -> Result<Option<PathBuf>, RepoError> {
    let (uri, branch, name) = match (repo.uri.as_deref(), repo.branch.as_deref(), repo.name()) {
        (Some(uri), Some(branch), Some(name)) => (uri, branch, name),
        (None, ..) | (_, _, None) => {
            log::warn!("repo entry needs a 'uri' key. Skipping");
            return Ok(None);
        }
        (_, None, _) => {
            log::warn!("repo entry {} needs a 'branch' key. Skipping", name_or(repo));
            return Ok(None);
        }
    };

    let dir = app_dir.join(name);
    if !dir.join(".git").exists() {
        if dir.exists() {
            log::debug!("Removing stale {:?}", &dir);
            fs::remove_dir_all(&dir).map_err(|e| RepoError::Io(e, dir.clone()))?;
        }
        runner.run(&git(&["clone", uri, "-b", branch, name], app_dir))?;
    }

    match repo.rev.as_deref() {
        Some(rev) => runner.run(&git(&["reset", "--hard", rev], &dir))?,
        None => {
            runner.run(&git(&["reset", "--hard"], &dir))?;
            runner.run(&git(&["pull", "--all"], &dir))?;
        }
    }

    if dir.join(".gitmodules").exists() {
        runner.run(&git(&["submodule", "update", "--init", "--recursive"], &dir))?;
    }

    Ok(Some(dir))
}

fn name_or(repo: &RepoEntry) -> &str {
    repo.name().unwrap_or("<unnamed>")
}

/// Clones every repository concurrently. All clones finish before the
/// first error is reported.
pub fn clone_all(
    workspace: &Workspace,
    repos: &[RepoEntry],
    runner: &dyn CommandRunner,
    pool: &Pool,
    keep_alive: &KeepAlive,
) -> Result<Vec<PathBuf>, RepoError> {
    let app_dir = workspace.app_dir();
    fs::create_dir_all(&app_dir).map_err(|e| RepoError::Io(e, app_dir.clone()))?;

    let dir: &Path = &app_dir;
    let tasks: Vec<_> = repos
        .iter()
        .map(|repo| move || sync(dir, repo, runner))
        .collect();

    keep_alive.refresh()?;
    let results = pool.join(tasks);
    keep_alive.refresh()?;

    let cloned = pool::first_failure(results)?;
    log::info!("{}", banner("Repos Cloned"));
    Ok(cloned.into_iter().flatten().collect())
}

#[derive(Debug, Serialize)]
struct LaunchFile {
    version: &'static str,
    configurations: Vec<LaunchConfiguration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchConfiguration {
    name: String,
    cwd: String,
    request: &'static str,
    #[serde(rename = "type")]
    ty: &'static str,
    device_id: String,
}

fn launch_configurations(repos: &[RepoEntry], platform_ids: &[&str]) -> Vec<LaunchConfiguration> {
    repos
        .iter()
        .filter_map(|repo| Some((repo.name()?, repo.pubspec_path.as_deref()?)))
        .flat_map(|(name, pubspec)| {
            platform_ids.iter().map(move |id| LaunchConfiguration {
                name: format!("{} ({})", name, id),
                cwd: format!("app/{}", pubspec),
                request: "launch",
                ty: "dart",
                device_id: id.to_string(),
            })
        })
        .collect()
}

/// Writes `.vscode/launch.json` unless one already exists.
pub fn write_launch_file(
    workspace: &Workspace,
    repos: &[RepoEntry],
    platform_ids: &[&str],
) -> Result<bool, RepoError> {
    let dir = workspace.vscode_dir();
    let path = dir.join("launch.json");
    if path.exists() {
        log::debug!("{:?} exists, leaving it alone", &path);
        return Ok(false);
    }

    let launch = LaunchFile {
        version: "0.2.0",
        configurations: launch_configurations(repos, platform_ids),
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    launch
        .serialize(&mut ser)
        .map_err(|e| RepoError::Json(e, path.clone()))?;

    fs::create_dir_all(&dir).map_err(|e| RepoError::Io(e, dir.clone()))?;
    fs::write(&path, buf).map_err(|e| RepoError::Io(e, path.clone()))?;
    log::info!("Wrote {:?}", &path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Command>>);

    impl CommandRunner for Recorder {
        fn run(&self, command: &Command) -> Result<(), CommandError> {
            self.0.lock().unwrap().push(command.clone());
            Ok(())
        }

        fn output(&self, command: &Command) -> Result<String, CommandError> {
            self.run(command).map(|_| String::new())
        }
    }

    fn repo(uri: &str, branch: Option<&str>, rev: Option<&str>) -> RepoEntry {
        RepoEntry {
            uri: Some(uri.into()),
            branch: branch.map(Into::into),
            rev: rev.map(Into::into),
            pubspec_path: None,
        }
    }

    fn lines(recorder: &Recorder) -> Vec<String> {
        recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn fresh_clone_then_pull() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let entry = repo("https://github.com/flutter/gallery.git", Some("main"), None);

        let path = sync(dir.path(), &entry, &recorder).unwrap();
        assert_eq!(path, Some(dir.path().join("gallery")));
        assert_eq!(
            lines(&recorder),
            vec![
                "git clone https://github.com/flutter/gallery.git -b main gallery",
                "git reset --hard",
                "git pull --all",
            ]
        );
    }

    #[test]
    fn existing_checkout_resets_to_rev_and_updates_submodules() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("gallery");
        fs::create_dir_all(checkout.join(".git")).unwrap();
        fs::write(checkout.join(".gitmodules"), "").unwrap();

        let recorder = Recorder::default();
        let entry = repo("https://github.com/flutter/gallery", Some("main"), Some("abc123"));
        sync(dir.path(), &entry, &recorder).unwrap();

        assert_eq!(
            lines(&recorder),
            vec![
                "git reset --hard abc123",
                "git submodule update --init --recursive",
            ]
        );
    }

    #[test]
    fn entries_without_branch_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let entry = repo("https://github.com/flutter/gallery", None, None);

        assert_eq!(sync(dir.path(), &entry, &recorder).unwrap(), None);
        assert!(lines(&recorder).is_empty());
    }

    #[test]
    fn launch_file_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let mut entry = repo("https://github.com/flutter/gallery.git", Some("main"), None);
        entry.pubspec_path = Some("gallery".into());
        let repos = vec![entry, repo("https://example.com/tools.git", Some("main"), None)];

        assert!(write_launch_file(&workspace, &repos, &["desktop-auto", "qemu"]).unwrap());

        let path = workspace.vscode_dir().join("launch.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], "0.2.0");
        let configs = value["configurations"].as_array().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1]["name"], "gallery (qemu)");
        assert_eq!(configs[1]["cwd"], "app/gallery");
        assert_eq!(configs[1]["deviceId"], "qemu");
        assert_eq!(configs[1]["type"], "dart");
        assert!(fs::read_to_string(&path).unwrap().contains("\n    \"version\""));

        assert!(!write_launch_file(&workspace, &repos, &["other"]).unwrap());
    }
}
