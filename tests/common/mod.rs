#![allow(dead_code)]

use std::sync::Mutex;

use flutter_workspace::{Command, CommandError, CommandRunner};

/// Records every command instead of running it. Commands whose program is
/// `fail_on` exit with status 1.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<Command>>,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub fn failing_on(program: &str) -> RecordingRunner {
        RecordingRunner {
            commands: Mutex::new(vec![]),
            fail_on: Some(program.to_string()),
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.commands().iter().map(|c| c.to_string()).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &Command) -> Result<(), CommandError> {
        self.commands.lock().unwrap().push(command.clone());
        if self.fail_on.as_deref() == Some(command.program.as_str()) {
            return Err(CommandError::Status {
                command: command.to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }

    fn output(&self, command: &Command) -> Result<String, CommandError> {
        self.run(command).map(|_| String::new())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}
