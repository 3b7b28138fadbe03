use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::{CommandError, Environment};

/// A command as written in configuration: one shell-style line, or an
/// already split argument list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl CommandLine {
    fn build(&self, env: &Environment) -> Result<Vec<String>, CommandError> {
        match self {
            CommandLine::Line(line) => env.argv(line),
            CommandLine::Argv(argv) => Ok(argv.iter().map(|a| env.expand(a)).collect()),
        }
    }
}

/// The `custom-device` section of a platform entry, before placeholders are
/// resolved.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTemplate {
    pub id: String,
    pub label: String,
    pub sdk_name_and_version: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub ping: CommandLine,
    #[serde(default)]
    pub ping_success_regex: Option<String>,
    #[serde(default)]
    pub post_build: Option<CommandLine>,
    #[serde(default)]
    pub install: Option<CommandLine>,
    #[serde(default)]
    pub uninstall: Option<CommandLine>,
    #[serde(default)]
    pub run_debug: Option<CommandLine>,
    #[serde(default)]
    pub forward_port: Option<CommandLine>,
    #[serde(default)]
    pub forward_port_success_regex: Option<String>,
    #[serde(default)]
    pub screenshot: Option<CommandLine>,
}

fn enabled() -> bool {
    true
}

/// An entry of the Flutter custom devices file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
    pub sdk_name_and_version: String,
    pub platform: Option<String>,
    pub enabled: bool,
    pub ping: Vec<String>,
    pub ping_success_regex: Option<String>,
    pub post_build: Option<Vec<String>>,
    pub install: Option<Vec<String>>,
    pub uninstall: Option<Vec<String>>,
    pub run_debug: Option<Vec<String>>,
    pub forward_port: Option<Vec<String>>,
    pub forward_port_success_regex: Option<String>,
    pub screenshot: Option<Vec<String>>,
    /// Fields this tool does not know about, kept as found.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceTemplate {
    /// Expands every placeholder against `env` and splits command fields
    /// into argument vectors.
    pub fn build(&self, env: &Environment) -> Result<DeviceDescriptor, CommandError> {
        let text = |s: &String| env.expand(s);
        let opt_text = |s: &Option<String>| s.as_ref().map(|s| env.expand(s));
        let argv = |c: &Option<CommandLine>| c.as_ref().map(|c| c.build(env)).transpose();

        Ok(DeviceDescriptor {
            id: text(&self.id),
            label: text(&self.label),
            sdk_name_and_version: text(&self.sdk_name_and_version),
            platform: opt_text(&self.platform),
            enabled: self.enabled,
            ping: self.ping.build(env)?,
            ping_success_regex: opt_text(&self.ping_success_regex),
            post_build: argv(&self.post_build)?,
            install: argv(&self.install)?,
            uninstall: argv(&self.uninstall)?,
            run_debug: argv(&self.run_debug)?,
            forward_port: argv(&self.forward_port)?,
            forward_port_success_regex: opt_text(&self.forward_port_success_regex),
            screenshot: argv(&self.screenshot)?,
            extra: Map::new(),
        })
    }
}
