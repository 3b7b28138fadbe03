use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use indexmap::IndexMap;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Could not split `{0}` into arguments")]
    Tokenize(String),

    #[error("Command line is empty")]
    Empty,

    #[error("Failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}", code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".into()))]
    Status { command: String, code: Option<i32> },

    #[error("Could not open stdin file {1}")]
    Stdin(#[source] io::Error, PathBuf),
}

/// Variables available to placeholder expansion and to spawned processes.
///
/// Replaces reading and writing the process environment between stages:
/// every stage receives the values it needs through one of these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(IndexMap<String, String>);

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    /// Snapshot of the current process environment.
    pub fn from_process() -> Environment {
        Environment(std::env::vars().collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Environment {
        self.set(key, value);
        self
    }

    pub fn set_path<K: Into<String>>(&mut self, key: K, value: &Path) {
        self.set(key, value.to_string_lossy().into_owned());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replaces `$NAME` and `${NAME}` with known values. Unknown references
    /// are left untouched.
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) if is_name(&braced[..end]) => (&braced[..end], end + 2),
                    _ => ("", 0),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };

            match self.get(name) {
                Some(value) if !name.is_empty() => {
                    out.push_str(value);
                    rest = &after[consumed..];
                }
                _ => {
                    out.push('$');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Expands placeholders, then splits with shell quoting rules.
    pub fn argv(&self, input: &str) -> Result<Vec<String>, CommandError> {
        let expanded = self.expand(input);
        shlex::split(&expanded).ok_or(CommandError::Tokenize(expanded))
    }

    pub fn command(&self, input: &str) -> Result<Command, CommandError> {
        Command::from_argv(self.argv(input)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Environment(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<Environment>,
    pub quiet: bool,
    pub stdin: Option<PathBuf>,
}

impl Command {
    pub fn new<S: Into<String>>(program: S) -> Command {
        Command {
            program: program.into(),
            args: vec![],
            cwd: None,
            env: None,
            quiet: false,
            stdin: None,
        }
    }

    pub fn from_argv(argv: Vec<String>) -> Result<Command, CommandError> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or(CommandError::Empty)?;
        Ok(Command::new(program).args(argv))
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Command {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd<P: Into<PathBuf>>(mut self, cwd: P) -> Command {
        self.cwd = Some(cwd.into());
        self
    }

    /// The child sees exactly this environment.
    pub fn env(mut self, env: &Environment) -> Command {
        self.env = Some(env.clone());
        self
    }

    /// Discards stdout.
    pub fn quiet(mut self) -> Command {
        self.quiet = true;
        self
    }

    pub fn stdin_file<P: Into<PathBuf>>(mut self, path: P) -> Command {
        self.stdin = Some(path.into());
        self
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    fn to_process(&self) -> Result<std::process::Command, CommandError> {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            cmd.env_clear();
            cmd.envs(env.iter());
        }
        if self.quiet {
            cmd.stdout(Stdio::null());
        }
        if let Some(path) = &self.stdin {
            let file = File::open(path).map_err(|e| CommandError::Stdin(e, path.clone()))?;
            cmd.stdin(file);
        }
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Runs external commands. Every nonzero exit is an error.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &Command) -> Result<(), CommandError>;

    /// Runs the command and returns its stdout.
    fn output(&self, command: &Command) -> Result<String, CommandError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &Command) -> Result<(), CommandError> {
        log::info!("Running [{}] in {:?}", command, command.cwd);
        let status = command
            .to_process()?
            .status()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(CommandError::Status {
                command: command.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }

    fn output(&self, command: &Command) -> Result<String, CommandError> {
        log::debug!("Capturing [{}]", command);
        let output = command
            .to_process()?
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Status {
                command: command.to_string(),
                code: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new()
            .with("FLUTTER_WORKSPACE", "/work space")
            .with("ARCH", "x86_64")
    }

    #[test]
    fn expands_braced_and_bare_names() {
        let env = env();
        assert_eq!(env.expand("${ARCH}-$ARCH/x"), "x86_64-x86_64/x");
        assert_eq!(env.expand("$ARCH_SUFFIX ${MISSING} $"), "$ARCH_SUFFIX ${MISSING} $");
        assert_eq!(env.expand("cost: $5"), "cost: $5");
    }

    #[test]
    fn argv_keeps_expanded_values_with_spaces_quoted() {
        let env = env();
        let argv = env
            .argv("ssh -p 2222 root@localhost \"ls ${FLUTTER_WORKSPACE}\"")
            .unwrap();
        assert_eq!(
            argv,
            vec!["ssh", "-p", "2222", "root@localhost", "ls /work space"]
        );
    }

    #[test]
    fn argv_rejects_unbalanced_quotes() {
        assert!(matches!(
            Environment::new().argv("echo \"oops"),
            Err(CommandError::Tokenize(_))
        ));
    }

    #[test]
    fn empty_command_line_is_an_error() {
        assert!(matches!(
            Environment::new().command("   "),
            Err(CommandError::Empty)
        ));
    }

    #[test]
    fn system_runner_reports_exit_status() {
        let runner = SystemRunner;
        runner.run(&Command::new("true")).unwrap();
        match runner.run(&Command::new("false")) {
            Err(CommandError::Status { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
