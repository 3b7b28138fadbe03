use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use structopt::StructOpt;

use flutter_workspace::env_script::ActivationScript;
use flutter_workspace::flash::Flasher;
use flutter_workspace::provision::PlatformOutcome;
use flutter_workspace::sdk::Sdk;
use flutter_workspace::{
    banner, repos, CommandRunner, Environment, Fetcher, HostInfo, KeepAlive, Pool, Provisioner,
    SystemRunner, Workspace, WorkspaceConfig,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "flutter-workspace",
    about = "Sets up a Flutter workspace for the configured platforms"
)]
struct Opts {
    /// Configuration folder or aggregate JSON file
    #[structopt(long, default_value = "configs", parse(from_os_str))]
    config: PathBuf,

    /// Workspace root; defaults to $FLUTTER_WORKSPACE, then the current folder
    #[structopt(long, parse(from_os_str))]
    workspace: Option<PathBuf>,

    /// Wipes the workspace before setting it up
    #[structopt(long)]
    clean: bool,

    /// Flutter version to check out; overrides `flutter-version` of the globals
    #[structopt(long)]
    flutter_version: Option<String>,

    /// Only fetch the engine runtime for the checked out SDK, then exit
    #[structopt(long)]
    fetch_engine: bool,

    /// Platform Load Excludes: space separated platform ids to skip
    #[structopt(long, default_value = "")]
    plex: String,

    /// Flash the space separated platform ids with fastboot, then exit
    #[structopt(long, default_value = "")]
    fastboot: String,

    /// File fed to `sudo -S` instead of the terminal
    #[structopt(long, parse(from_os_str))]
    stdin_file: Option<PathBuf>,

    /// Run without acquiring or refreshing sudo credentials
    #[structopt(long)]
    no_sudo: bool,
}

fn ids(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_string).collect()
}

fn run(opts: Opts) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let keep_alive = if opts.no_sudo {
        KeepAlive::disabled(runner.clone())
    } else {
        KeepAlive::new(runner.clone())
    };
    if !keep_alive.is_enabled() {
        log::warn!("sudo keep-alive disabled; commands needing root may prompt or fail");
    }
    keep_alive
        .acquire(opts.stdin_file.as_deref())
        .context("Could not acquire sudo credentials")?;

    let base = Environment::from_process();
    let workspace = match opts.workspace {
        Some(root) => Workspace::new(root),
        None => Workspace::from_env(&base).context("Could not determine the workspace folder")?,
    };
    log::info!(
        "{}",
        banner(&format!(
            "Setting up Flutter Workspace in: {}",
            workspace.root().display()
        ))
    );

    workspace.create()?;

    let host = HostInfo::detect();
    let sdk = Sdk::new(&workspace, &host, &*runner, &base);

    if opts.fetch_engine {
        log::info!("{}", banner("Fetching Engine Artifacts"));
        sdk.fetch_engine(&Fetcher::default(), true)
            .context("Could not fetch the engine runtime")?;
        return Ok(());
    }

    let config = WorkspaceConfig::load(&opts.config)
        .with_context(|| format!("Invalid workspace configuration {:?}", &opts.config))?;

    if opts.clean {
        log::info!("{}", banner("Cleaning Workspace"));
        workspace.clean()?;
        workspace.create()?;
    }

    let fastboot = ids(&opts.fastboot);
    if !fastboot.is_empty() {
        log::info!("{}", banner("Fastboot Flash"));
        return Flasher::new(&*runner, &host)
            .flash_all(&workspace, &config.platforms, &fastboot, &base)
            .context("Fastboot flashing failed");
    }

    let pool = Pool::default();
    repos::clone_all(&workspace, &config.repos, &*runner, &pool, &keep_alive)
        .context("Could not check out repositories")?;
    repos::write_launch_file(&workspace, &config.repos, &config.platform_ids())?;

    let version = opts
        .flutter_version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.globals.flutter_version().to_string());
    sdk.checkout(&version)
        .with_context(|| format!("Could not check out Flutter {}", &version))?;
    sdk.configure().context("Could not configure the Flutter SDK")?;
    sdk.fetch_engine(&Fetcher::default(), opts.clean)
        .context("Could not fetch the engine runtime")?;

    ActivationScript::new(workspace.env_script()).write_header()?;

    let provisioner = Provisioner::new(workspace.clone(), host.clone(), runner.clone())
        .keep_alive(keep_alive)
        .pool(pool)
        .globals(config.globals.clone())
        .exclude(ids(&opts.plex))
        .base_env(base);

    let outcomes = provisioner.provision_all(&config.platforms)?;
    for (id, outcome) in &outcomes {
        match outcome {
            PlatformOutcome::Provisioned => log::info!("{}: provisioned", id),
            PlatformOutcome::Skipped(reason) => log::info!("{}: skipped ({:?})", id, reason),
        }
    }

    if version == flutter_workspace::defaults::FLUTTER_CHANNEL {
        sdk.list_devices()?;
    }

    log::info!("{}", banner("Setup Flutter Workspace - Complete"));
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::from_args();
    if let Err(e) = run(opts) {
        log::error!("{}", banner(&format!("{:#}", e)));
        std::process::exit(1);
    }
}
