use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command '{0}' failed with exit code {1}")]
    CommandFailed(String, i32),

    #[error("Command '{0}' not found on PATH")]
    CommandNotFound(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("This command must be run as root (sudo)")]
    NotRoot,

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("No configuration found at {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("Configuration at {} could not be parsed: {reason}", .path.display())]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fact could not be determined. Never fatal; callers degrade to unknown.
    #[error("Could not determine {fact}: {reason}")]
    ProbeDegraded { fact: &'static str, reason: String },

    #[error("{device}: {reason}")]
    DiskOpFailed { device: String, reason: String },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Cannot persist {}: {reason}", .path.display())]
    FatalState { path: PathBuf, reason: String },
}

impl ForgeError {
    pub fn disk(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DiskOpFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn degraded(fact: &'static str, reason: impl ToString) -> Self {
        Self::ProbeDegraded {
            fact,
            reason: reason.to_string(),
        }
    }

    /// Failures the operator can act on from a one-line message. Everything
    /// else inside the install path is handed to the crash reporter.
    pub fn is_anticipated(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::NotRoot
                | Self::ConfigMissing(_)
                | Self::ConfigCorrupt { .. }
                | Self::InvalidConfig(_)
                | Self::Prompt(_)
        )
    }
}

/// Outcome of a Provisioner call that did not succeed.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{name}: command '{command}' failed with exit code {code}")]
    Command {
        name: String,
        command: String,
        code: i32,
    },

    #[error("{name}: {reason}")]
    Unsupported { name: String, reason: String },

    #[error("{name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn unsupported(name: &str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Attaches the provisioner name to a failed command invocation.
    pub fn from_forge(name: &str, err: ForgeError) -> Self {
        match err {
            ForgeError::CommandFailed(command, code) => Self::Command {
                name: name.to_string(),
                command,
                code,
            },
            ForgeError::Io(source) => Self::Io {
                name: name.to_string(),
                source,
            },
            other => Self::Unsupported {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
