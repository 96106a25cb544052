//! Error taxonomy for the core crate.
//!
//! Every variant that names a command carries the rendered program and
//! argument vector only. Input piped to a child process (the one-time auth
//! code) is never stored in an error.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single external command invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write input to '{command}': {source}")]
    Stdin {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {}", .output.trim())]
    NonZeroExit {
        command: String,
        status: String,
        output: String,
    },
}

/// Failure while querying the platform through its CLI.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not logged in: run 'cf login' first")]
    NotAuthenticated,

    #[error("cannot parse 'cf target' output: {output}")]
    ParseTarget { output: String },

    #[error("cannot decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("cannot obtain guid of app '{app}': {source}")]
    AppLookup {
        app: String,
        #[source]
        source: ExecError,
    },

    #[error("app '{app}' not found")]
    AppNotFound { app: String },

    #[error("app '{app}' has no running instances")]
    NoInstances { app: String },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl PlatformError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        PlatformError::Decode {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Failure of one remote-copy attempt against one application instance.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("authentication rejected for user '{user}'")]
    AuthRejected { user: String },

    #[error("cannot mint auth code: {0}")]
    CodeUnavailable(#[source] PlatformError),

    #[error("scp protocol error: {0}")]
    Protocol(String),

    #[error("remote scp exited with status {status}: {message}")]
    RemoteExit { status: u32, message: String },

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl TransferError {
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, TransferError::AuthRejected { .. })
    }

    pub fn is_code_unavailable(&self) -> bool {
        matches!(self, TransferError::CodeUnavailable(_))
    }
}

/// A transfer failure attributed to a specific instance index.
#[derive(Debug)]
pub struct InstanceFailure {
    pub index: u32,
    pub error: TransferError,
}

impl std::fmt::Display for InstanceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance {}: {}", self.index, self.error)
    }
}

/// Top-level failure of a [`crate::copier::Copier::copy`] invocation.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("cannot stat {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("cannot authenticate: {0}")]
    CannotAuthenticate(#[source] PlatformError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("copy failed on {} instance(s): {}", .failures.len(), join_failures(.failures))]
    Transfer { failures: Vec<InstanceFailure> },
}

impl CopyError {
    /// Indices of the instances that failed, empty for non-transfer errors.
    pub fn failed_instances(&self) -> Vec<u32> {
        match self {
            CopyError::Transfer { failures } => failures.iter().map(|f| f.index).collect(),
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[InstanceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
