use std::fs;
use std::path::{Path, PathBuf};

use crate::banner;
use crate::command::Command;
use crate::config::Conditional;
use crate::defaults;

use super::{PlatformContext, ProvisionError, Provisioner};

pub(super) fn write_config_snapshot(ctx: &PlatformContext<'_>) -> Result<(), ProvisionError> {
    let config = match &ctx.platform.runtime.config {
        Some(v) if !v.is_null() => v,
        _ => return Ok(()),
    };

    let path = ctx.dir.join(defaults::PLATFORM_CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ProvisionError::configuration(ctx.id(), e.to_string()))?;
    fs::write(&path, json).map_err(|e| ProvisionError::Io(e, path.clone()))?;
    log::debug!("Wrote {:?}", &path);
    Ok(())
}

fn run_lines(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
    lines: &[String],
    cwd: &Path,
) -> Result<(), ProvisionError> {
    for line in lines {
        let command = ctx.command_in(line, cwd, &ctx.env)?;
        provisioner.runner.run(&command)?;
    }
    Ok(())
}

/// Runs each conditional's commands iff its path is absent.
pub(super) fn conditionals(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
    conditionals: &[Conditional],
    cwd: &Path,
) -> Result<(), ProvisionError> {
    for conditional in conditionals {
        let path = PathBuf::from(ctx.env.expand(&conditional.path));
        if path.exists() {
            log::debug!("{:?} exists, skipping its commands", &path);
            continue;
        }

        log::info!("{}", banner("Conditionals"));
        run_lines(provisioner, ctx, &conditional.cmds, cwd)?;
    }
    Ok(())
}

/// `pre-requisites[arch][host]`: conditionals, then commands.
pub(super) fn pre_requisites(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
) -> Result<(), ProvisionError> {
    let by_arch = match &ctx.platform.runtime.pre_requisites {
        Some(v) => v,
        None => return Ok(()),
    };
    let by_host = match by_arch.get(&provisioner.host.arch) {
        Some(v) => v,
        None => return Ok(()),
    };
    let steps = match by_host.get(&ctx.host_key) {
        Some(v) => v,
        None => {
            log::warn!(
                "{} has no pre-requisites for {} on {}",
                ctx.id(),
                &ctx.host_key,
                &provisioner.host.arch
            );
            return Ok(());
        }
    };

    log::info!("{}", banner("Pre-requisites"));
    conditionals(provisioner, ctx, &steps.conditionals, &ctx.dir)?;
    run_lines(provisioner, ctx, &steps.cmds, &ctx.dir)
}

/// Stops the compose project, runs the scoped steps and starts it again.
pub(super) fn docker(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
) -> Result<(), ProvisionError> {
    let docker = match &ctx.platform.runtime.docker {
        Some(v) => v,
        None => return Ok(()),
    };
    let compose_dir = docker
        .compose_dir
        .as_ref()
        .map(|d| PathBuf::from(ctx.env.expand(d)));

    let compose = |args: &[&str], dir: &Path| {
        Command::new("docker-compose")
            .args(args.iter().copied())
            .cwd(dir)
            .env(&ctx.env)
    };

    if let Some(dir) = &compose_dir {
        provisioner.runner.run(&compose(&["stop"], dir))?;
    }

    run_lines(provisioner, ctx, &docker.post_cmds, &ctx.dir)?;
    conditionals(provisioner, ctx, &docker.conditionals, &ctx.dir)?;

    if let Some(dir) = &compose_dir {
        provisioner.runner.run(&compose(&["up", "-d"], dir))?;
    }
    Ok(())
}

/// `runtime.post_cmds`: each group may carry host-specific variables that
/// apply to its own commands only.
pub(super) fn post_commands(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
) -> Result<(), ProvisionError> {
    for group in &ctx.platform.runtime.post_cmds {
        if group.cmds.is_empty() {
            continue;
        }

        let mut env = ctx.env.clone();
        for (key, value) in group.env_for(&ctx.host_key) {
            let value = env.expand(&value);
            env.set(key, value);
        }

        let cwd = match &group.cwd {
            Some(cwd) => {
                let cwd = PathBuf::from(env.expand(cwd));
                fs::create_dir_all(&cwd).map_err(|e| ProvisionError::Io(e, cwd.clone()))?;
                cwd
            }
            None => ctx.dir.clone(),
        };

        for line in &group.cmds {
            let command = ctx.command_in(line, &cwd, &env)?;
            provisioner.runner.run(&command)?;
        }
    }
    Ok(())
}

/// Registers the platform's custom device, replacing earlier entries.
pub(super) fn register_device(
    provisioner: &Provisioner,
    ctx: &PlatformContext<'_>,
) -> Result<(), ProvisionError> {
    let device = match ctx.platform.device() {
        Some(v) => v,
        None => return Ok(()),
    };

    let registry = crate::devices::Registry::from_env(&ctx.env)
        .unwrap_or_else(|| provisioner.workspace.registry());

    if device.overwrite_existing {
        registry.remove(ctx.id())?;
    }

    let descriptor = device.custom_device.build(&ctx.env)?;
    registry.upsert(&descriptor)?;
    Ok(())
}
