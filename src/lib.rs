#![deny(unused_must_use)]
#![deny(rust_2018_idioms)]

pub mod archive;
pub mod checksum;
pub mod command;
pub mod config;
pub mod defaults;
pub mod devices;
pub mod download;
pub mod env_script;
pub mod flash;
pub mod github;
pub mod host;
pub mod pool;
pub mod privilege;
pub mod provision;
pub mod repos;
pub mod sdk;
pub mod workspace;

mod auth;
mod ext;

pub use self::command::{Command, CommandError, CommandRunner, Environment, SystemRunner};
pub use self::config::{Globals, PlatformConfig, RepoEntry, WorkspaceConfig};
pub use self::devices::{DeviceDescriptor, Registry};
pub use self::download::{Fetcher, Request};
pub use self::host::HostInfo;
pub use self::pool::Pool;
pub use self::privilege::KeepAlive;
pub use self::provision::{PlatformOutcome, ProvisionError, Provisioner};
pub use self::workspace::Workspace;

/// Frames `text` the way every stage header and fatal diagnostic is printed.
pub fn banner(text: &str) -> String {
    let rule = "*".repeat(text.chars().count() + 6);
    format!("{}\n** {} **\n{}", rule, text, rule)
}
