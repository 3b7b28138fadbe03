use std::path::{Path, PathBuf};

use crate::auth;
use crate::banner;
use crate::command::Environment;
use crate::config::{ArtifactSection, GithubArtifacts};
use crate::download::{Acquired, Request};
use crate::github::{ArtifactQuery, Github};
use crate::pool;

use super::{PlatformContext, ProvisionError, Provisioner};

enum Fetched {
    Http(Acquired),
    Github(Vec<PathBuf>),
}

type Task<'a> = Box<dyn FnOnce() -> Result<Fetched, ProvisionError> + Send + 'a>;

/// Cookie file for HTTP artifacts: the `http` section wins over globals,
/// which win over the artifacts section.
fn cookie_file(
    global: Option<&Path>,
    section: &ArtifactSection,
    env: &Environment,
) -> Option<PathBuf> {
    section
        .http
        .as_ref()
        .and_then(|h| h.cookie_file.as_deref())
        .or(global)
        .or(section.cookie_file.as_deref())
        .map(|p| PathBuf::from(env.expand(&p.to_string_lossy())))
}

/// The netrc file to authenticate with, once it is known to mention
/// `machine`.
fn check_netrc(ctx: &PlatformContext<'_>, machine: &str) -> Result<PathBuf, ProvisionError> {
    let path = auth::netrc_path(&ctx.env)
        .ok_or_else(|| ProvisionError::configuration(ctx.id(), "Cannot locate ~/.netrc"))?;

    if !path.is_file() {
        return Err(ProvisionError::configuration(
            ctx.id(),
            format!("{} does not exist", path.display()),
        ));
    }
    if !auth::netrc_mentions(&path, machine) {
        return Err(ProvisionError::configuration(
            ctx.id(),
            format!("Missing {} from {}", machine, path.display()),
        ));
    }

    log::info!("{:?} is good", &path);
    Ok(path)
}

fn http_tasks<'a>(
    provisioner: &'a Provisioner,
    ctx: &'a PlatformContext<'_>,
    section: &'a ArtifactSection,
    netrc: Option<PathBuf>,
) -> Result<Vec<Task<'a>>, ProvisionError> {
    let http = match &section.http {
        Some(v) => v,
        None => return Ok(vec![]),
    };

    let cookies = cookie_file(
        provisioner.globals.cookie_file.as_deref(),
        section,
        &ctx.env,
    );
    let base = http.url.as_deref();
    let dir: &'a Path = &ctx.dir;

    http.for_arch(&provisioner.host.arch)
        .iter()
        .map(|entry| -> Result<Task<'a>, ProvisionError> {
            let url = ctx.env.expand(&entry.raw_url(base));
            let request = Request::parse(&url)?
                .cookie_file(cookies.clone())
                .netrc(netrc.clone());
            let expected = entry.expected();
            log::debug!("Queueing {}", &url);

            Ok(Box::new(move || {
                provisioner
                    .fetcher
                    .acquire(&request, dir, expected.as_ref())
                    .map(Fetched::Http)
                    .map_err(ProvisionError::from)
            }))
        })
        .collect()
}

fn github_task<'a>(
    provisioner: &'a Provisioner,
    ctx: &'a PlatformContext<'_>,
    github: &'a GithubArtifacts,
) -> Result<Task<'a>, ProvisionError> {
    let token = provisioner.globals.github_token().ok_or_else(|| {
        ProvisionError::configuration(ctx.id(), "GitHub artifacts need a github_token")
    })?;

    let mut client = Github::new(
        provisioner.fetcher.clone(),
        token,
        provisioner.workspace.tmp_dir(),
    );
    if let Some(api) = &provisioner.github_api {
        client = client.with_api(api.clone());
    }

    let dir: &'a Path = &ctx.dir;
    Ok(Box::new(move || {
        log::info!("{}", banner("Downloading GitHub artifact"));
        let query = ArtifactQuery {
            owner: &github.owner,
            repo: &github.repo,
            workflow: &github.workflow,
            artifact_names: &github.artifact_names,
        };
        client
            .resolve_and_fetch(&query, dir)
            .map(Fetched::Github)
            .map_err(ProvisionError::from)
    }))
}

/// Fetches every artifact of the platform concurrently. The whole batch
/// runs to completion before the first failure, in declaration order, is
/// returned.
pub(super) fn acquire(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
) -> Result<(), ProvisionError> {
    let section = match &ctx.platform.runtime.artifacts {
        Some(v) => v,
        None => return Ok(()),
    };

    let netrc = match &section.netrc {
        Some(netrc) => Some(check_netrc(ctx, &netrc.machine)?),
        None => None,
    };

    let mut tasks = http_tasks(provisioner, ctx, section, netrc)?;
    if let Some(github) = &section.github {
        tasks.push(github_task(provisioner, ctx, github)?);
    }

    if tasks.is_empty() {
        return Ok(());
    }

    log::info!("{}", banner(&format!("Fetching {} artifacts", ctx.id())));
    provisioner.refresh()?;
    let results = provisioner.pool.join(tasks);
    provisioner.refresh()?;

    for fetched in pool::first_failure(results)? {
        match fetched {
            Fetched::Http(Acquired::Cached(path)) => log::info!("Using cached {:?}", path),
            Fetched::Http(Acquired::Downloaded(path)) => log::info!("Downloaded {:?}", path),
            Fetched::Github(paths) => log::info!("Unpacked {:?}", paths),
        }
    }

    if let Some(github) = &section.github {
        for line in &github.post_process {
            let command = ctx.command(line)?;
            provisioner.runner.run(&command)?;
        }
    }

    Ok(())
}
