//! Supervisor types and configuration.
//!
//! These types define how supervisors manage their children.

use crate::config::{EnvValue, ProcessOptions};
use crate::core::{Pid, RawTerm, Term};
use crate::error::SpawnError;
use crate::gen_server::{self, GenServer};
use crate::node::Node;
use crate::process::Process;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Supervision strategy that determines how child failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// If a child process terminates, only that process is restarted.
    #[default]
    OneForOne,
    /// If a child process terminates, all other child processes are
    /// terminated and then all child processes are restarted.
    OneForAll,
    /// If a child process terminates, the terminated process and all
    /// children started after it are terminated and restarted.
    RestForOne,
    /// Every child is a dynamically started instance of a single template
    /// spec; a terminated instance is restarted on its own.
    SimpleOneForOne,
}

/// Determines when a child should be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RestartType {
    /// The child is always restarted, regardless of exit reason.
    #[default]
    Permanent,
    /// The child is restarted only if it terminates abnormally.
    Transient,
    /// The child is never restarted.
    Temporary,
}

impl RestartType {
    /// Returns `true` if a child exiting with `reason` should be restarted.
    pub fn should_restart(&self, reason: &crate::core::ExitReason) -> bool {
        match self {
            RestartType::Permanent => true,
            RestartType::Transient => reason.is_abnormal(),
            RestartType::Temporary => false,
        }
    }
}

/// Determines how a child should be terminated during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownType {
    /// The child is killed immediately; its terminate callback does not run.
    BrutalKill,
    /// The child is asked to stop and killed if it has not exited in time.
    Timeout(Duration),
    /// The child can take as long as needed to terminate.
    Infinity,
}

impl Default for ShutdownType {
    fn default() -> Self {
        ShutdownType::Timeout(Duration::from_secs(5))
    }
}

/// The type of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChildType {
    /// A worker process (leaf node in supervision tree).
    #[default]
    Worker,
    /// A supervisor process (internal node in supervision tree).
    Supervisor,
}

/// Error returned by a child start function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartChildError {
    /// The child failed to start.
    Failed(String),
    /// The child's init returned ignore.
    Ignore,
}

impl fmt::Display for StartChildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartChildError::Failed(msg) => write!(f, "child failed to start: {}", msg),
            StartChildError::Ignore => write!(f, "child init returned ignore"),
        }
    }
}

impl std::error::Error for StartChildError {}

impl From<SpawnError> for StartChildError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::Ignored => StartChildError::Ignore,
            other => StartChildError::Failed(other.to_string()),
        }
    }
}

/// What a start function gets from its supervisor.
///
/// Children started through [`StartContext::start_link`] are linked to the
/// supervisor and inherit its environment.
#[derive(Debug, Clone)]
pub struct StartContext {
    node: Node,
    parent: Pid,
    env: HashMap<String, EnvValue>,
    args: Option<RawTerm>,
}

impl StartContext {
    pub(crate) fn new(
        node: Node,
        parent: Pid,
        env: HashMap<String, EnvValue>,
        args: Option<RawTerm>,
    ) -> Self {
        Self {
            node,
            parent,
            env,
            args,
        }
    }

    /// The node the supervisor runs on.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The supervisor's pid.
    pub fn parent(&self) -> Pid {
        self.parent
    }

    /// Extra start arguments, given to `start_child` on a
    /// simple-one-for-one supervisor.
    pub fn args(&self) -> Option<&RawTerm> {
        self.args.as_ref()
    }

    /// Spawn options carrying the supervisor's environment.
    pub fn options(&self) -> ProcessOptions {
        ProcessOptions::new().with_env(self.env.clone())
    }

    /// Starts a GenServer linked to the supervisor.
    pub async fn start_link<G: GenServer>(
        &self,
        name: Option<&str>,
        arg: G::InitArg,
    ) -> Result<Process, StartChildError> {
        gen_server::start_with::<G>(&self.node, name, self.options(), arg, Some(self.parent))
            .await
            .map_err(Into::into)
    }
}

/// A function that starts a child process.
pub type StartFn =
    Arc<dyn Fn(StartContext) -> BoxFuture<'static, Result<Process, StartChildError>> + Send + Sync>;

/// Specification for a child process.
///
/// This defines how a child should be started, restarted, and terminated.
#[derive(Clone)]
pub struct ChildSpec {
    /// Identifier, unique among the supervisor's static children.
    pub id: String,
    /// Function to start the child.
    pub start: StartFn,
    /// When the child should be restarted.
    pub restart: RestartType,
    /// How the child should be terminated.
    pub shutdown: ShutdownType,
    /// Whether this is a worker or supervisor.
    pub child_type: ChildType,
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown", &self.shutdown)
            .field("child_type", &self.child_type)
            .finish()
    }
}

impl ChildSpec {
    /// Creates a child specification with a custom start function.
    ///
    /// The supervisor links itself to whatever process the function
    /// returns.
    pub fn new<F, Fut>(id: impl Into<String>, start: F) -> Self
    where
        F: Fn(StartContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Process, StartChildError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            start: Arc::new(move |ctx| Box::pin(start(ctx))),
            restart: RestartType::default(),
            shutdown: ShutdownType::default(),
            child_type: ChildType::default(),
        }
    }

    /// A GenServer child started with a clone of `arg` each time.
    pub fn gen_server<G>(id: impl Into<String>, arg: G::InitArg) -> Self
    where
        G: GenServer,
        G::InitArg: Clone + Sync,
    {
        Self::new(id, move |ctx: StartContext| {
            let arg = arg.clone();
            async move { ctx.start_link::<G>(None, arg).await }
        })
    }

    /// A GenServer child registered under `name`.
    pub fn named<G>(id: impl Into<String>, name: impl Into<String>, arg: G::InitArg) -> Self
    where
        G: GenServer,
        G::InitArg: Clone + Sync,
    {
        let name: String = name.into();
        Self::new(id, move |ctx: StartContext| {
            let arg = arg.clone();
            let name = name.clone();
            async move { ctx.start_link::<G>(Some(&name), arg).await }
        })
    }

    /// A template for simple-one-for-one supervisors: each instance decodes
    /// its init argument from the arguments given to `start_child`.
    pub fn template<G>(id: impl Into<String>) -> Self
    where
        G: GenServer,
        G::InitArg: Term,
    {
        Self::new(id, |ctx: StartContext| async move {
            let arg = ctx
                .args()
                .ok_or_else(|| StartChildError::Failed("missing start arguments".into()))?
                .try_decode::<G::InitArg>()
                .map_err(|e| StartChildError::Failed(e.to_string()))?;
            ctx.start_link::<G>(None, arg).await
        })
    }

    /// A nested supervisor child.
    pub fn supervised<S>(id: impl Into<String>, arg: S::InitArg) -> Self
    where
        S: super::Supervisor,
        S::InitArg: Clone + Sync,
    {
        Self::new(id, move |ctx: StartContext| {
            let arg = arg.clone();
            async move {
                super::start_supervisor::<S>(
                    ctx.node(),
                    None,
                    ctx.options(),
                    arg,
                    Some(ctx.parent()),
                )
                .await
                .map_err(Into::into)
            }
        })
        .supervisor()
    }

    /// Sets the restart type.
    pub fn restart(mut self, restart: RestartType) -> Self {
        self.restart = restart;
        self
    }

    /// Sets the shutdown type.
    pub fn shutdown(mut self, shutdown: ShutdownType) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Sets the child type.
    pub fn child_type(mut self, child_type: ChildType) -> Self {
        self.child_type = child_type;
        self
    }

    /// Marks this child as a worker.
    pub fn worker(self) -> Self {
        self.child_type(ChildType::Worker)
    }

    /// Marks this child as a supervisor.
    pub fn supervisor(self) -> Self {
        self.child_type(ChildType::Supervisor)
            .shutdown(ShutdownType::Infinity)
    }
}

/// Supervisor initialization flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorFlags {
    /// The supervision strategy.
    pub strategy: Strategy,
    /// Maximum number of restarts allowed within `period`.
    pub max_restarts: u32,
    /// Sliding window for restart counting.
    pub period: Duration,
}

impl Default for SupervisorFlags {
    fn default() -> Self {
        Self {
            strategy: Strategy::OneForOne,
            max_restarts: 3,
            period: Duration::from_secs(5),
        }
    }
}

impl SupervisorFlags {
    /// Creates new supervisor flags with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Sets the maximum restarts.
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    /// Sets the window for restart counting.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// Identifies a child in runtime requests.
///
/// Simple-one-for-one children share their template id and are addressed by
/// pid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildId {
    /// The id from the child spec.
    Id(String),
    /// The child's current pid.
    Pid(Pid),
}

impl From<&str> for ChildId {
    fn from(id: &str) -> Self {
        ChildId::Id(id.to_string())
    }
}

impl From<String> for ChildId {
    fn from(id: String) -> Self {
        ChildId::Id(id)
    }
}

impl From<Pid> for ChildId {
    fn from(pid: Pid) -> Self {
        ChildId::Pid(pid)
    }
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildId::Id(id) => write!(f, "{}", id),
            ChildId::Pid(pid) => write!(f, "{}", pid),
        }
    }
}

/// Information about a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildInfo {
    /// The child's identifier.
    pub id: String,
    /// The child's pid, if running.
    pub pid: Option<Pid>,
    /// The child type.
    pub child_type: ChildType,
    /// The restart type.
    pub restart: RestartType,
}

/// Statistics about supervisor children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCounts {
    /// Number of child entries.
    pub specs: usize,
    /// Number of running children.
    pub active: usize,
    /// Number of entries of type supervisor.
    pub supervisors: usize,
    /// Number of entries of type worker.
    pub workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExitReason;

    #[test]
    fn test_restart_gating() {
        let shutdown = ExitReason::Shutdown;
        let crash = ExitReason::error("boom");

        assert!(RestartType::Permanent.should_restart(&ExitReason::Normal));
        assert!(RestartType::Permanent.should_restart(&crash));
        assert!(!RestartType::Transient.should_restart(&ExitReason::Normal));
        assert!(!RestartType::Transient.should_restart(&shutdown));
        assert!(RestartType::Transient.should_restart(&crash));
        assert!(RestartType::Transient.should_restart(&ExitReason::Killed));
        assert!(!RestartType::Temporary.should_restart(&crash));
    }

    #[test]
    fn test_flags_builder() {
        let flags = SupervisorFlags::new(Strategy::RestForOne)
            .max_restarts(10)
            .period(Duration::from_secs(60));
        assert_eq!(flags.strategy, Strategy::RestForOne);
        assert_eq!(flags.max_restarts, 10);
        assert_eq!(flags.period, Duration::from_secs(60));
    }

    #[test]
    fn test_supervisor_child_defaults_to_infinity() {
        let spec = ChildSpec::new("sup", |_ctx| async {
            Err(StartChildError::Failed("unused".into()))
        })
        .supervisor();
        assert_eq!(spec.child_type, ChildType::Supervisor);
        assert_eq!(spec.shutdown, ShutdownType::Infinity);
    }

    #[test]
    fn test_spawn_error_conversion() {
        assert_eq!(
            StartChildError::from(SpawnError::Ignored),
            StartChildError::Ignore
        );
        assert!(matches!(
            StartChildError::from(SpawnError::InitFailed(ExitReason::error("x"))),
            StartChildError::Failed(_)
        ));
    }
}
