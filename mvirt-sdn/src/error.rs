//! Error types for mvirt-sdn.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Desired graph validation errors. Fatal to a pass, nothing is dispatched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("dependency cycle detected involving {0}")]
    Cycle(String),

    #[error("{item} depends on {dependency}, which is not in the graph")]
    DanglingDependency { item: String, dependency: String },

    #[error("duplicate item {0}")]
    DuplicateItem(String),
}

/// MAC address that does not parse as six colon-separated hex octets.
#[derive(Debug, Error)]
#[error("invalid MAC address: {0}")]
pub struct InvalidMac(pub String);

/// Configurator registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("configurator already registered for item type {0}")]
    AlreadyRegistered(String),
}

/// Process supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{binary} did not create pid file {pid_file} within {timeout:?}")]
    StartupTimeout {
        binary: String,
        pid_file: PathBuf,
        timeout: Duration,
    },

    #[error("process {pid} still alive after {timeout:?} and SIGKILL")]
    ShutdownTimeout { pid: i32, timeout: Duration },

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{binary} exited before becoming ready: {status}")]
    Exited { binary: String, status: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid pid file {path}: {content:?}")]
    InvalidPidFile { path: PathBuf, content: String },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Errors returned by configurators (and recorded per item by the scheduler).
#[derive(Debug, Error)]
pub enum ConfiguratorError {
    /// Modify is not supported; the scheduler falls back to delete+create.
    #[error("not implemented")]
    NotImplemented,

    #[error("no configurator registered for item type {0}")]
    NotFound(String),

    #[error("failed to get physical interface with MAC {0}")]
    InterfaceNotFound(String),

    #[error("invalid item type {actual}, expected {expected}")]
    InvalidItem { expected: String, actual: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("reconciliation pass cancelled before the operation completed")]
    Cancelled,

    #[error("background operation dropped its completion without reporting")]
    CompletionDropped,
}

impl ConfiguratorError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ConfiguratorError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors that abort a whole reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid desired graph: {0}")]
    Validation(#[from] ValidationError),
}
