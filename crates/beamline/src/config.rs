//! Node and process configuration.
//!
//! Both types are plain builders with defaults suitable for tests and small
//! deployments:
//!
//! ```
//! use beamline::config::{NodeConfig, ProcessOptions};
//! use std::time::Duration;
//!
//! let config = NodeConfig::new()
//!     .mailbox_size(256)
//!     .route_retries(3)
//!     .call_timeout(Duration::from_secs(2));
//! assert_eq!(config.mailbox_size, 256);
//!
//! let opts = ProcessOptions::new().env("pool_size", 4i64).trap_exit(true);
//! assert!(opts.trap_exit);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default capacity of a process mailbox.
pub const DEFAULT_MAILBOX_SIZE: usize = 1024;

/// Default number of times a remote route is retried before it is dropped.
pub const DEFAULT_ROUTE_RETRIES: u32 = 3;

/// Default delay between remote route retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default timeout for `call` when none (or zero) is given.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the outbound queue of a peer link.
pub const DEFAULT_SEND_QUEUE_LENGTH: usize = 100;

/// Default time to wait for a process to leave the table on stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Node-wide settings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Mailbox capacity for processes that do not override it.
    pub mailbox_size: usize,
    /// Connection attempts made for a remote route before dropping it.
    pub route_retries: u32,
    /// Delay before a remote route is retried.
    pub retry_delay: Duration,
    /// Timeout used by `call` when the caller passes zero.
    pub call_timeout: Duration,
    /// Capacity of each peer's outbound queue.
    pub send_queue_length: usize,
    /// How long stop operations wait for a process to exit.
    pub shutdown_timeout: Duration,
    /// Incarnation number stamped on every pid and ref.
    pub creation: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            route_retries: DEFAULT_ROUTE_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            send_queue_length: DEFAULT_SEND_QUEUE_LENGTH,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            creation: 1,
        }
    }
}

impl NodeConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default mailbox capacity.
    pub fn mailbox_size(mut self, size: usize) -> Self {
        self.mailbox_size = size.max(1);
        self
    }

    /// Sets the number of remote route retries.
    pub fn route_retries(mut self, retries: u32) -> Self {
        self.route_retries = retries;
        self
    }

    /// Sets the delay between remote route retries.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the default call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.call_timeout = timeout;
        }
        self
    }

    /// Sets the peer outbound queue capacity.
    pub fn send_queue_length(mut self, len: usize) -> Self {
        self.send_queue_length = len.max(1);
        self
    }

    /// Sets the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the creation number.
    pub fn creation(mut self, creation: u32) -> Self {
        self.creation = creation;
        self
    }

    /// Resolves a caller-supplied call timeout, falling back to the default
    /// for zero.
    pub fn effective_call_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.call_timeout
        } else {
            requested
        }
    }
}

/// A value stored in a process or application environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnvValue {
    /// A string value.
    String(String),
    /// An integer value.
    Int(i64),
    /// A float value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// A list of values.
    List(Vec<EnvValue>),
}

impl EnvValue {
    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EnvValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        EnvValue::String(s.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(s: String) -> Self {
        EnvValue::String(s)
    }
}

impl From<i64> for EnvValue {
    fn from(i: i64) -> Self {
        EnvValue::Int(i)
    }
}

impl From<f64> for EnvValue {
    fn from(f: f64) -> Self {
        EnvValue::Float(f)
    }
}

impl From<bool> for EnvValue {
    fn from(b: bool) -> Self {
        EnvValue::Bool(b)
    }
}

/// Per-process spawn options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Mailbox capacity; `None` uses the node default.
    pub mailbox_size: Option<usize>,
    /// Initial environment.
    pub env: HashMap<String, EnvValue>,
    /// Whether exit signals arrive as messages instead of terminating.
    pub trap_exit: bool,
}

impl ProcessOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the mailbox capacity.
    pub fn mailbox_size(mut self, size: usize) -> Self {
        self.mailbox_size = Some(size.max(1));
        self
    }

    /// Adds one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replaces the environment wholesale.
    pub fn with_env(mut self, env: HashMap<String, EnvValue>) -> Self {
        self.env = env;
        self
    }

    /// Sets the trap-exit flag.
    pub fn trap_exit(mut self, trap: bool) -> Self {
        self.trap_exit = trap;
        self
    }
}
