//! Scripted `CommandRunner` for unit tests

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::command::{CommandOutput, CommandRunner};
use crate::error::display_command;

/// Canned reply for one command
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    Status(i32),
    SpawnError(ErrorKind, String),
}

pub fn ok(stdout: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    })
}

pub fn fail(exit_code: i32, stderr: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    })
}

pub fn status(exit_code: i32) -> Reply {
    Reply::Status(exit_code)
}

pub fn spawn_error(kind: ErrorKind, msg: &str) -> Reply {
    Reply::SpawnError(kind, msg.to_string())
}

/// Replies are matched by command-line prefix, first match wins and is
/// consumed. Unmatched commands succeed with empty output. Every call is
/// recorded; inherited-stdio calls are recorded as `status: <command>`.
#[derive(Default)]
pub struct FakeRunner {
    replies: Mutex<VecDeque<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
    on_path: Vec<String>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` resolvable through `locate`
    pub fn on_path(mut self, program: &str) -> Self {
        self.on_path.push(program.to_string());
        self
    }

    pub fn expect(&self, prefix: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .push_back((prefix.to_string(), reply));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn take(&self, line: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let index = replies
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))?;
        replies.remove(index).map(|(_, reply)| reply)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn output(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<CommandOutput> {
        let line = display_command(program, args);
        self.calls.lock().unwrap().push(line.clone());

        match self.take(&line) {
            None => Ok(CommandOutput::new()),
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Status(exit_code)) => Ok(CommandOutput {
                exit_code,
                ..CommandOutput::new()
            }),
            Some(Reply::SpawnError(kind, msg)) => Err(std::io::Error::new(kind, msg)),
        }
    }

    async fn status(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<i32> {
        let line = display_command(program, args);
        self.calls.lock().unwrap().push(format!("status: {}", line));

        match self.take(&line) {
            None => Ok(0),
            Some(Reply::Output(output)) => Ok(output.exit_code),
            Some(Reply::Status(exit_code)) => Ok(exit_code),
            Some(Reply::SpawnError(kind, msg)) => Err(std::io::Error::new(kind, msg)),
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.on_path
            .iter()
            .any(|p| p == program)
            .then(|| PathBuf::from(program))
    }
}
