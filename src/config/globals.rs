use std::path::PathBuf;

use serde::Deserialize;

use crate::defaults;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Globals {
    #[serde(rename = "flutter-version", alias = "flutter_version", default)]
    pub flutter_version: Option<String>,
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

impl Globals {
    /// `flutter-version`, defaulting to the master channel.
    pub fn flutter_version(&self) -> &str {
        self.flutter_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults::FLUTTER_CHANNEL)
    }

    /// The configured token, or `GITHUB_TOKEN` from the environment.
    pub fn github_token(&self) -> Option<String> {
        self.github_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(defaults::GITHUB_TOKEN_ENV).ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoEntry {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub pubspec_path: Option<String>,
}

impl RepoEntry {
    /// Folder name the repository is cloned into: the last URI segment up
    /// to the first dot.
    pub fn name(&self) -> Option<&str> {
        let uri = self.uri.as_deref()?;
        let last = uri.trim_end_matches('/').rsplit('/').next()?;
        last.split('.').next().filter(|n| !n.is_empty())
    }
}

#[test]
fn repo_name_strips_git_suffix() {
    let repo = RepoEntry {
        uri: Some("https://github.com/flutter/gallery.git".into()),
        ..RepoEntry::default()
    };
    assert_eq!(repo.name(), Some("gallery"));
    assert_eq!(RepoEntry::default().name(), None);
}

#[test]
fn flutter_version_defaults_to_master() {
    assert_eq!(Globals::default().flutter_version(), "master");
    let globals: Globals = serde_json::from_str(r#"{"flutter-version": "3.7.12"}"#).unwrap();
    assert_eq!(globals.flutter_version(), "3.7.12");
}
