use std::{error, fmt};

/// Errors produced by the runtime orchestrator.
#[derive(Debug)]
pub enum Error {
    /// A module's `on_init` or `on_start` returned an error. Startup is
    /// aborted and every module that had already started is torn down in
    /// reverse registration order.
    ModuleStartFailed { module: String, reason: String },
    /// `start()` called while the runtime was already running.
    AlreadyRunning,
    /// `stop()` called while the runtime was not running.
    NotRunning,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ModuleStartFailed { module, reason } => {
                write!(f, "module '{}' failed to start: {}", module, reason)
            }
            Error::AlreadyRunning => write!(f, "runtime is already running"),
            Error::NotRunning => write!(f, "runtime is not running"),
        }
    }
}

impl error::Error for Error {}
