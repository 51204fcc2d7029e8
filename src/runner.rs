use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{DropError, DropResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg {
    pub value: String,
    pub secret: bool,
}

/// One external program call, fully resolved before it is logged or run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<CommandArg>,
    pub stdin: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Splits a configured command such as `clickhouse client` into the
    /// program and its leading arguments.
    pub fn from_command_line(command: &str) -> Self {
        let mut words = command.split_whitespace();
        let mut invocation = Self::new(words.next().unwrap_or_default());
        for word in words {
            invocation = invocation.arg(word);
        }
        invocation
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(CommandArg {
            value: value.into(),
            secret: false,
        });
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(CommandArg {
            value: value.into(),
            secret: true,
        });
        self
    }

    pub fn stdin_from(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    pub fn arg_values(&self) -> Vec<&str> {
        self.args.iter().map(|arg| arg.value.as_str()).collect()
    }

    /// Shell-like rendering with secrets masked. Printed identically in
    /// dry-run and real runs.
    pub fn render(&self) -> String {
        let mut parts = vec![quote(&self.program)];
        for arg in &self.args {
            if arg.secret {
                parts.push("****".to_string());
            } else {
                parts.push(quote(&arg.value));
            }
        }
        if let Some(stdin) = &self.stdin {
            parts.push("<".to_string());
            parts.push(quote(&stdin.display().to_string()));
        }
        parts.join(" ")
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> DropResult<CommandOutput>;
}

/// Runs programs for real, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> DropResult<CommandOutput> {
        let mut command = Command::new(&invocation.program);
        command.args(invocation.args.iter().map(|arg| arg.value.as_str()));

        match &invocation.stdin {
            Some(path) => {
                let file = File::open(path).map_err(|source| {
                    DropError::io(format!("failed to open stdin {}", path.display()), source)
                })?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        let output = command.output().map_err(|source| DropError::Command {
            program: invocation.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Spawn failures and non-zero exits are the same failure; the message is
/// what the caller records.
pub fn run_to_success(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<CommandOutput, String> {
    match runner.run(invocation) {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            let code = output
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(format!(
                "{} exited with {}: {}",
                invocation.program,
                code,
                output.stderr.trim()
            ))
        }
        Err(err) => Err(err.to_string()),
    }
}
