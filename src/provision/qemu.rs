use std::fs;

use rand::Rng;

use crate::defaults;
use crate::env_script::{launcher, ActivationScript};
use crate::host::HostInfo;

use super::{PlatformContext, ProvisionError, Provisioner};

const APPLE_SCRIPT: &str = r#"#!/usr/bin/osascript

tell application "Finder"
    set flutter_workspace to system attribute "FLUTTER_WORKSPACE"
    set p_path to POSIX path of flutter_workspace
    tell application "Terminal"
        activate
        set a to do script "cd " & quoted form of p_path & " && {command}"
    end tell
end tell
"#;

/// A locally administered MAC in the Xen OUI range, `00:16:3e:xx:xx:xx`,
/// with the fourth byte kept below `0x80`.
pub fn random_mac<R: Rng>(rng: &mut R) -> String {
    let mac = [
        0x00,
        0x16,
        0x3e,
        rng.gen_range(0x00..=0x7f),
        rng.gen::<u8>(),
        rng.gen::<u8>(),
    ];
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Command the `run-<id>` shell function uses to start the emulator.
pub fn terminal_command(host: &HostInfo, id: &str, cmd: &str, args: &str) -> String {
    if host.is_linux() {
        format!("gnome-terminal -- bash -c \"{} {}\"", cmd, args)
    } else if host.is_darwin() {
        format!("osascript ${{FLUTTER_WORKSPACE}}/run-{}.scpt", id)
    } else {
        format!("{} {}", cmd, args)
    }
}

fn apple_script(cmd: &str, args: &str) -> String {
    APPLE_SCRIPT.replace("{command}", &format!("{} {}", cmd, args))
}

/// Adds the `run-<id>` launcher for a QEMU image to the activation script.
pub(super) fn wire(provisioner: &Provisioner, ctx: &PlatformContext<'_>) -> Result<(), ProvisionError> {
    let qemu = match &ctx.platform.runtime.qemu {
        Some(v) => v,
        None => return Ok(()),
    };
    let host = &provisioner.host;

    let arch = qemu.archs.get(&host.arch).ok_or_else(|| {
        ProvisionError::configuration(
            ctx.id(),
            "Configuration not specified for this host machine architecture",
        )
    })?;
    if qemu.cmd.trim().is_empty() {
        return Err(ProvisionError::configuration(ctx.id(), "Command not specified"));
    }

    let mut env = ctx.env.clone();

    if let Some(extra) = &qemu.extra {
        let params = extra.get(&ctx.host_key).ok_or_else(|| {
            ProvisionError::configuration(
                ctx.id(),
                "Extra parameters not specified for this host type",
            )
        })?;
        let prefix = if host.is_linux() && host.kvm_capable {
            "-enable-kvm "
        } else {
            ""
        };
        let value = env.expand(&format!("{}{}", prefix, params));
        env.set("QEMU_EXTRA", value);
    }

    env.set("FORMAL_MACHINE_ARCH", host.formal_arch());
    env.set("RANDOM_MAC", random_mac(&mut rand::thread_rng()));
    if let Some(runtime) = ctx.platform.flutter_runtime() {
        env.set("FLUTTER_RUNTIME", runtime);
    }

    let cmd = env.expand(&qemu.cmd);
    if let Some(kernel) = &arch.kernel {
        let kernel = ctx.dir.join(env.expand(kernel));
        env.set_path("QEMU_KERNEL", &kernel);
    }
    let image = ctx.dir.join(env.expand(&arch.image));
    env.set_path("QEMU_IMAGE", &image);
    let args = env.expand(&arch.args);

    let port = env
        .get(defaults::SSH_PORT_ENV)
        .map(str::to_string)
        .ok_or_else(|| {
            ProvisionError::configuration(
                ctx.id(),
                format!("{} is not set", defaults::SSH_PORT_ENV),
            )
        })?;

    if host.is_darwin() {
        let path = provisioner.workspace.apple_script(ctx.id());
        fs::write(&path, apple_script(&cmd, &args))
            .map_err(|e| ProvisionError::Io(e, path.clone()))?;
        log::debug!("Wrote {:?}", &path);
    }

    let terminal = terminal_command(host, ctx.id(), &cmd, &args);
    let script = ActivationScript::new(provisioner.workspace.env_script());
    script.set_block(ctx.id(), &launcher(ctx.id(), &port, &terminal))?;
    Ok(())
}
