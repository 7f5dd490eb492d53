//! Application types and configuration.

use super::error::ApplicationError;
use crate::config::EnvValue;
use crate::core::{ExitReason, Pid};
use crate::process::Context;
use crate::supervisor::{ChildSpec, Strategy, SupervisorFlags};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An OTP-style application.
///
/// The value itself carries whatever the application needs to build its
/// spec; `load` is called once per load, including when the application is
/// pulled in as a dependency of another one.
///
/// # Example
///
/// ```ignore
/// struct Shop {
///     workers: usize,
/// }
///
/// impl Application for Shop {
///     fn load(&self) -> Result<ApplicationSpec, ApplicationError> {
///         Ok(ApplicationSpec::new("shop")
///             .version("1.0.0")
///             .env("workers", self.workers as i64)
///             .child(ChildSpec::named::<Cart>("cart", "cart", ())))
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Describes the application.
    fn load(&self) -> Result<ApplicationSpec, ApplicationError>;

    /// Runs inside the application's root process once its children are up.
    ///
    /// An error aborts the start; the children are shut down again.
    async fn start(&self, _ctx: &mut Context, _spec: &ApplicationSpec) -> Result<(), ExitReason> {
        Ok(())
    }
}

/// How the node reacts when a started application's root process exits
/// without being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartType {
    /// The exit is only reported.
    #[default]
    Temporary,
    /// A normal exit is reported; any other reason stops the node.
    Transient,
    /// Any exit stops the node.
    Permanent,
}

impl fmt::Display for StartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartType::Temporary => write!(f, "temporary"),
            StartType::Transient => write!(f, "transient"),
            StartType::Permanent => write!(f, "permanent"),
        }
    }
}

/// Application specification.
#[derive(Clone)]
pub struct ApplicationSpec {
    /// Unique name on the node.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Version string.
    pub version: String,
    /// Environment installed on the root process and inherited by the tree.
    pub env: HashMap<String, EnvValue>,
    /// The children of the application's top supervisor, in start order.
    pub children: Vec<ChildSpec>,
    /// Applications loaded before this one and started before it.
    pub applications: Vec<Arc<dyn Application>>,
    /// Flags of the top supervisor.
    pub flags: SupervisorFlags,
    /// If set, the application is stopped this long after each start.
    pub lifespan: Option<Duration>,
}

impl fmt::Debug for ApplicationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationSpec")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("env", &self.env)
            .field("children", &self.children)
            .field("applications", &self.applications.len())
            .field("flags", &self.flags)
            .field("lifespan", &self.lifespan)
            .finish()
    }
}

impl ApplicationSpec {
    /// Creates an empty spec named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: String::new(),
            env: HashMap::new(),
            children: Vec::new(),
            applications: Vec::new(),
            flags: SupervisorFlags::default(),
            lifespan: None,
        }
    }

    /// Sets the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Sets the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Appends a child to the top supervisor.
    pub fn child(mut self, child: ChildSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Adds a dependency, loaded and started before this application.
    pub fn depends_on(mut self, app: impl Application) -> Self {
        self.applications.push(Arc::new(app));
        self
    }

    /// Sets the top supervisor's strategy.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.flags.strategy = strategy;
        self
    }

    /// Sets the top supervisor's flags.
    pub fn flags(mut self, flags: SupervisorFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Stops the application `lifespan` after it starts.
    pub fn lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }
}

/// Information about a loaded application.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationInfo {
    /// The application name.
    pub name: String,
    /// Description from the spec.
    pub description: String,
    /// Version from the spec.
    pub version: String,
    /// Names of the applications started before this one.
    pub dependencies: Vec<String>,
    /// Environment from the spec.
    pub env: HashMap<String, EnvValue>,
    /// The root process, while running.
    pub pid: Option<Pid>,
    /// How it was started, while running.
    pub start_type: Option<StartType>,
}

impl ApplicationInfo {
    /// Returns `true` while the application is started.
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}
