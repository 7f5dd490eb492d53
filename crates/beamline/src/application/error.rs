//! Application error types.

use thiserror::Error;

/// Errors returned by the application controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    /// An application with this name is already loaded.
    #[error("application already loaded: {0}")]
    AlreadyLoaded(String),

    /// The application is running.
    #[error("application already started: {0}")]
    AlreadyStarted(String),

    /// No application with this name is loaded.
    #[error("unknown application: {0}")]
    ApplicationUnknown(String),

    /// The application is not running.
    #[error("application not running: {0}")]
    NotRunning(String),

    /// The dependency chain loops back on itself.
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// `load` returned an unusable spec.
    #[error("invalid application spec: {0}")]
    InvalidSpec(String),

    /// The root process did not come up.
    #[error("application {name} failed to start: {reason}")]
    StartFailed {
        /// The application.
        name: String,
        /// Why.
        reason: String,
    },
}
