use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for a provisioning run.
///
/// Each variant corresponds to the stage that failed, so the binary can
/// report which part of the run went wrong and exit with a stage-specific
/// status.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("This program must be run as root (use sudo); effective uid is {0}")]
    NotRoot(u32),

    #[error("Unable to detect OS from {path:?}: {source}")]
    Detection {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported OS: {0:?}")]
    UnsupportedOs(String),

    #[error("Installing gcsfuse failed: {0}")]
    Install(#[source] StepError),

    #[error("Mounting bucket failed: {0}")]
    Mount(#[source] StepError),

    #[error("Persisting mount in {path:?} failed: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ProvisionError {
    /// Convert error to the process exit status for this stage
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::NotRoot(_) => 1,
            ProvisionError::Detection { .. } => 2,
            ProvisionError::UnsupportedOs(_) => 3,
            ProvisionError::Install(_) => 4,
            ProvisionError::Mount(_) => 5,
            ProvisionError::Persist { .. } => 6,
            ProvisionError::Config(_) => 7,
        }
    }
}

/// Failure of a single step inside the install or mount stage
#[derive(Error, Debug)]
pub enum StepError {
    #[error("`{command}` {status}")]
    CommandFailed { command: String, status: ExitReason },

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("`lsb_release -c -s` returned an empty codename")]
    EmptyCodename,
}

impl StepError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StepError::Io {
            context: context.into(),
            source,
        }
    }
}

/// How a child process ended when it did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Code(code) => write!(f, "exited with status {}", code),
            ExitReason::Signal => write!(f, "was terminated by a signal"),
        }
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let errors = vec![
            ProvisionError::NotRoot(1000),
            ProvisionError::Detection {
                path: PathBuf::from("/etc/os-release"),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            ProvisionError::UnsupportedOs("alpine".to_string()),
            ProvisionError::Install(StepError::EmptyCodename),
            ProvisionError::Mount(StepError::CommandFailed {
                command: "gcsfuse bucket /mnt".to_string(),
                status: ExitReason::Code(1),
            }),
            ProvisionError::Persist {
                path: PathBuf::from("/etc/fstab"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
            ProvisionError::Config(ConfigError::ValidationError("bad".to_string())),
        ];

        let codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_step_error_names_command() {
        let err = ProvisionError::Install(StepError::CommandFailed {
            command: "apt-get update".to_string(),
            status: ExitReason::Code(100),
        });
        let msg = err.to_string();
        assert!(msg.contains("apt-get update"), "{}", msg);
        assert!(msg.contains("status 100"), "{}", msg);
    }
}
