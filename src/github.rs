//! Artifacts of the latest successful GitHub Actions workflow run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::archive::{self, ArchiveError};
use crate::defaults;
use crate::download::{DownloadError, Fetcher, Request};

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("GitHub message: {0}")]
    Api(String),

    #[error("Unexpected response from {url} (HTTP {status})")]
    Response {
        url: Url,
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("No successful run of workflow `{workflow}` in {owner}/{repo}")]
    NoSuccessfulRun {
        owner: String,
        repo: String,
        workflow: String,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("I/O error at {1}")]
    Io(#[source] io::Error, PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    pub archive_download_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    message: Option<String>,
    workflow_runs: Option<Vec<WorkflowRun>>,
    artifacts: Option<Vec<Artifact>>,
}

/// Which artifacts to pull and from where.
#[derive(Debug, Clone)]
pub struct ArtifactQuery<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub workflow: &'a str,
    pub artifact_names: &'a [String],
}

#[derive(Debug, Clone)]
pub struct Github {
    fetcher: Fetcher,
    token: String,
    api: String,
    tmp_dir: PathBuf,
}

impl Github {
    pub fn new<S: Into<String>>(fetcher: Fetcher, token: S, tmp_dir: PathBuf) -> Github {
        Github {
            fetcher,
            token: token.into(),
            api: defaults::GITHUB_API.to_string(),
            tmp_dir,
        }
    }

    /// Points the client at another API root, e.g. a GitHub Enterprise host.
    pub fn with_api<S: Into<String>>(mut self, api: S) -> Github {
        self.api = api.into().trim_end_matches('/').to_string();
        self
    }

    fn api_get(&self, path: &str) -> Result<Envelope, GithubError> {
        let url = format!("{}{}", self.api, path);
        let request = Request::parse(&url)?
            .header("Accept", "application/vnd.github+json")
            .bearer(self.token.clone());

        let (status, body) = self.fetcher.get_text(&request)?;
        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|source| GithubError::Response {
                url: request.url.clone(),
                status,
                source,
            })?;

        if let Some(message) = envelope.message {
            return Err(GithubError::Api(message));
        }
        Ok(envelope)
    }

    pub fn workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
    ) -> Result<Vec<WorkflowRun>, GithubError> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/runs",
            owner, repo, workflow
        );
        Ok(self.api_get(&path)?.workflow_runs.unwrap_or_default())
    }

    pub fn run_artifacts(
        &self,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<Vec<Artifact>, GithubError> {
        let path = format!("/repos/{}/{}/actions/runs/{}/artifacts", owner, repo, run_id);
        Ok(self.api_get(&path)?.artifacts.unwrap_or_default())
    }

    /// Downloads each requested artifact of the latest successful run and
    /// unpacks it into `dest_dir`. Returns the unpacked paths.
    pub fn resolve_and_fetch(
        &self,
        query: &ArtifactQuery<'_>,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, GithubError> {
        let runs = self.workflow_runs(query.owner, query.repo, query.workflow)?;
        let run = runs
            .iter()
            .find(|run| run.conclusion.as_deref() == Some("success"))
            .ok_or_else(|| GithubError::NoSuccessfulRun {
                owner: query.owner.to_string(),
                repo: query.repo.to_string(),
                workflow: query.workflow.to_string(),
            })?;
        log::info!("Using run {} of {}", run.id, query.workflow);

        let artifacts = self.run_artifacts(query.owner, query.repo, run.id)?;
        fs::create_dir_all(dest_dir).map_err(|e| GithubError::Io(e, dest_dir.to_path_buf()))?;

        let mut unpacked = vec![];
        for name in query.artifact_names {
            let artifact = match artifacts.iter().find(|a| &a.name == name) {
                Some(v) => v,
                None => {
                    log::warn!("Run {} has no artifact named {:?}", run.id, name);
                    continue;
                }
            };

            log::info!(
                "Downloading {} run_id: {} via {}",
                query.workflow,
                run.id,
                &artifact.archive_download_url
            );
            let zip = self.download(artifact)?;
            unpacked.extend(archive::unzip(&zip, dest_dir)?);
            fs::remove_file(&zip).map_err(|e| GithubError::Io(e, zip.clone()))?;
        }

        Ok(unpacked)
    }

    fn download(&self, artifact: &Artifact) -> Result<PathBuf, GithubError> {
        let request = Request::parse(&artifact.archive_download_url)?
            .follow_redirects(true)
            .bearer(self.token.clone());
        let dest = self.tmp_dir.join(format!("{}.zip", artifact.name));
        Ok(self.fetcher.fetch(&request, &dest)?)
    }
}
