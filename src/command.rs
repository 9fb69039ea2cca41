//! Typed external commands and the executors that run them
//!
//! Commands are argument vectors, never shell strings, so a bucket name or
//! mount path can't be reinterpreted by a shell. A command may read its
//! stdin from another command's stdout, which covers the one pipeline the
//! install needs (`curl ... | apt-key add -`).

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use crate::error::{ExitReason, StepError};

/// An external command: program, arguments and optional stdin producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Command whose stdout is connected to this command's stdin
    pub stdin_from: Option<Box<CommandSpec>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin_from: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed this command's stdin from `producer`'s stdout
    pub fn stdin_from(mut self, producer: CommandSpec) -> Self {
        self.stdin_from = Some(Box::new(producer));
        self
    }

    /// Arguments as lossy UTF-8, mostly for assertions
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(producer) = &self.stdin_from {
            write!(f, "{} | ", producer)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs commands on behalf of the install and mount stages
pub trait Executor {
    /// Run `spec`, streaming its output to ours.
    ///
    /// With `check` false a failure is logged and swallowed, and the
    /// result is always `Ok`.
    fn run(&mut self, spec: &CommandSpec, check: bool) -> Result<(), StepError>;

    /// Run `spec` and capture its stdout. Failure is always an error.
    fn output(&mut self, spec: &CommandSpec) -> Result<String, StepError>;
}

/// Executor backed by real child processes
#[derive(Debug, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }

    fn spawn_and_wait(&self, spec: &CommandSpec) -> Result<(), StepError> {
        let spawn_err = |source| StepError::Spawn {
            command: spec.to_string(),
            source,
        };

        let mut cmd = spec.to_command();
        let producer = match &spec.stdin_from {
            Some(producer_spec) => {
                let mut child = producer_spec
                    .to_command()
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(|source| StepError::Spawn {
                        command: producer_spec.to_string(),
                        source,
                    })?;
                if let Some(stdout) = child.stdout.take() {
                    cmd.stdin(Stdio::from(stdout));
                }
                Some((producer_spec, child))
            }
            None => None,
        };

        let status = cmd.status();
        // Release our copy of the pipe so the producer sees EOF/EPIPE
        drop(cmd);

        // The producer's failure matters even when the consumer coped with
        // truncated input.
        if let Some((producer_spec, mut child)) = producer {
            let producer_status = child.wait().map_err(|source| StepError::Spawn {
                command: producer_spec.to_string(),
                source,
            })?;
            if status.is_ok() {
                check_status(producer_spec, producer_status)?;
            }
        }

        check_status(spec, status.map_err(spawn_err)?)
    }
}

fn check_status(spec: &CommandSpec, status: ExitStatus) -> Result<(), StepError> {
    if status.success() {
        return Ok(());
    }
    Err(StepError::CommandFailed {
        command: spec.to_string(),
        status: match status.code() {
            Some(code) => ExitReason::Code(code),
            None => ExitReason::Signal,
        },
    })
}

impl Executor for SystemExecutor {
    fn run(&mut self, spec: &CommandSpec, check: bool) -> Result<(), StepError> {
        info!("▶ {}", spec);
        match self.spawn_and_wait(spec) {
            Ok(()) => Ok(()),
            Err(e) if !check => {
                warn!("Ignoring failure: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn output(&mut self, spec: &CommandSpec) -> Result<String, StepError> {
        debug!("Capturing output of {}", spec);
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| StepError::Spawn {
                command: spec.to_string(),
                source,
            })?;

        let mut stdout = String::new();
        let read = match child.stdout.take() {
            Some(mut pipe) => pipe.read_to_string(&mut stdout).map(|_| ()),
            None => Ok(()),
        };

        // Reap the child even when its output was unreadable
        let status = child.wait().map_err(|source| StepError::Spawn {
            command: spec.to_string(),
            source,
        })?;
        read.map_err(|e| StepError::io(format!("reading output of `{}`", spec), e))?;
        check_status(spec, status)?;

        Ok(stdout)
    }
}

/// Executor that records commands instead of running them.
///
/// Programs can be scripted to fail or to print canned output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    /// Every command passed to `run` or `output`, in order
    pub commands: Vec<CommandSpec>,
    failing: HashSet<String>,
    outputs: HashMap<String, String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `program` exit with status 1
    pub fn fail_program(mut self, program: impl Into<String>) -> Self {
        self.failing.insert(program.into());
        self
    }

    /// Stdout returned by `output` for `program`
    pub fn with_output(mut self, program: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.outputs.insert(program.into(), stdout.into());
        self
    }

    /// Recorded commands invoking `program`
    pub fn invocations<'a>(&'a self, program: &'a str) -> impl Iterator<Item = &'a CommandSpec> {
        self.commands.iter().filter(move |c| c.program == program)
    }

    /// Recorded commands rendered as display lines
    pub fn lines(&self) -> Vec<String> {
        self.commands.iter().map(ToString::to_string).collect()
    }

    fn outcome(&self, spec: &CommandSpec) -> Result<(), StepError> {
        let producer_failed = spec
            .stdin_from
            .as_ref()
            .map(|p| self.failing.contains(&p.program))
            .unwrap_or(false);

        if producer_failed || self.failing.contains(&spec.program) {
            return Err(StepError::CommandFailed {
                command: spec.to_string(),
                status: ExitReason::Code(1),
            });
        }
        Ok(())
    }
}

impl Executor for RecordingExecutor {
    fn run(&mut self, spec: &CommandSpec, check: bool) -> Result<(), StepError> {
        self.commands.push(spec.clone());
        match self.outcome(spec) {
            Err(e) if check => Err(e),
            _ => Ok(()),
        }
    }

    fn output(&mut self, spec: &CommandSpec) -> Result<String, StepError> {
        self.commands.push(spec.clone());
        self.outcome(spec)?;
        Ok(self.outputs.get(&spec.program).cloned().unwrap_or_default())
    }
}
