//! Application controller.
//!
//! Loaded applications live in a table keyed by name. Every start, stop and
//! unload of one application runs under that application's transition lock,
//! so two starts, or a start and a stop, never interleave. The running state
//! itself sits behind a plain mutex so queries never wait for a transition.
//!
//! A started application is a root process (the application master) that
//! installs the spec's environment, starts the top supervisor linked to
//! itself and runs the application's start hook. The master exits when the
//! supervisor does, and shuts the supervisor down when it is stopped.

use super::error::ApplicationError;
use super::types::{Application, ApplicationInfo, ApplicationSpec, StartType};
use crate::config::ProcessOptions;
use crate::core::{ExitReason, Pid};
use crate::gen_server::{self, CallResult, CastResult, From, GenServer, Info, InfoResult, InitResult};
use crate::node::Node;
use crate::process::{Context, Process};
use crate::supervisor::{self, SpecSupervisor, SupervisorInit};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Default)]
pub(crate) struct AppController {
    apps: RwLock<HashMap<String, Arc<LoadedApp>>>,
}

struct LoadedApp {
    spec: ApplicationSpec,
    app: Arc<dyn Application>,
    dependencies: Vec<String>,
    transition: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
}

#[derive(Clone)]
struct Running {
    process: Process,
    start_type: StartType,
}

impl LoadedApp {
    fn info(&self) -> ApplicationInfo {
        let running = self.running.lock();
        ApplicationInfo {
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            version: self.spec.version.clone(),
            dependencies: self.dependencies.clone(),
            env: self.spec.env.clone(),
            pid: running.as_ref().map(|r| r.process.pid()),
            start_type: running.as_ref().map(|r| r.start_type),
        }
    }
}

impl AppController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &str) -> Result<Arc<LoadedApp>, ApplicationError> {
        self.apps
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ApplicationError::ApplicationUnknown(name.to_string()))
    }

    /// Loads `app` after everything it depends on. Returns its name.
    ///
    /// If any application in the tree fails to load, the ones this call
    /// loaded are unloaded again.
    pub(crate) fn load(&self, app: Arc<dyn Application>) -> Result<String, ApplicationError> {
        let mut fresh = Vec::new();
        let result = self.load_with_path(app, &mut Vec::new(), &mut fresh);
        if result.is_err() && !fresh.is_empty() {
            let mut apps = self.apps.write();
            for name in &fresh {
                if apps.get(name).is_some_and(|a| a.running.lock().is_none()) {
                    apps.remove(name);
                }
            }
            debug!(unloaded = ?fresh, "rolled back partial load");
        }
        result
    }

    fn load_with_path(
        &self,
        app: Arc<dyn Application>,
        path: &mut Vec<String>,
        fresh: &mut Vec<String>,
    ) -> Result<String, ApplicationError> {
        let spec = app.load()?;
        let name = spec.name.clone();
        if name.is_empty() {
            return Err(ApplicationError::InvalidSpec("empty application name".into()));
        }
        if path.contains(&name) {
            let mut cycle = path.clone();
            cycle.push(name);
            return Err(ApplicationError::CircularDependency(cycle));
        }
        if self.apps.read().contains_key(&name) {
            return Err(ApplicationError::AlreadyLoaded(name));
        }

        path.push(name.clone());
        let mut dependencies = Vec::with_capacity(spec.applications.len());
        for dep in &spec.applications {
            match self.load_with_path(dep.clone(), path, fresh) {
                Ok(dep) | Err(ApplicationError::AlreadyLoaded(dep)) => dependencies.push(dep),
                Err(e) => {
                    path.pop();
                    return Err(e);
                }
            }
        }
        path.pop();

        match self.apps.write().entry(name.clone()) {
            Entry::Occupied(_) => Err(ApplicationError::AlreadyLoaded(name)),
            Entry::Vacant(slot) => {
                info!(app = %name, version = %spec.version, ?dependencies, "application loaded");
                slot.insert(Arc::new(LoadedApp {
                    spec,
                    app,
                    dependencies,
                    transition: tokio::sync::Mutex::new(()),
                    running: Mutex::new(None),
                }));
                fresh.push(name.clone());
                Ok(name)
            }
        }
    }

    pub(crate) async fn unload(&self, name: &str) -> Result<(), ApplicationError> {
        let app = self.get(name)?;
        let _transition = app.transition.lock().await;
        if app.running.lock().is_some() {
            return Err(ApplicationError::AlreadyStarted(name.to_string()));
        }
        self.apps.write().remove(name);
        info!(app = %name, "application unloaded");
        Ok(())
    }

    /// Starts `name` after its dependencies, which are started as temporary.
    pub(crate) fn start<'a>(
        &'a self,
        node: &'a Node,
        name: &'a str,
        start_type: StartType,
    ) -> BoxFuture<'a, Result<Process, ApplicationError>> {
        async move {
            let app = self.get(name)?;
            let _transition = app.transition.lock().await;
            if app.running.lock().is_some() {
                return Err(ApplicationError::AlreadyStarted(name.to_string()));
            }

            for dep in &app.dependencies {
                match self.start(node, dep, StartType::Temporary).await {
                    Ok(_) | Err(ApplicationError::AlreadyStarted(_)) => {}
                    Err(e) => return Err(e),
                }
            }

            let args = MasterArgs {
                app: app.app.clone(),
                spec: app.spec.clone(),
            };
            let options = ProcessOptions::new().with_env(app.spec.env.clone());
            let process = gen_server::start::<AppMaster>(node, None, options, args)
                .await
                .map_err(|e| ApplicationError::StartFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            *app.running.lock() = Some(Running {
                process: process.clone(),
                start_type,
            });
            tokio::spawn(watch(node.clone(), app.clone(), process.clone(), start_type));
            if let Some(lifespan) = app.spec.lifespan {
                tokio::spawn(expire(node.clone(), name.to_string(), process.pid(), lifespan));
            }

            info!(app = %name, pid = %process.pid(), %start_type, "application started");
            Ok(process)
        }
        .boxed()
    }

    pub(crate) async fn stop(&self, name: &str) -> Result<(), ApplicationError> {
        self.stop_running(name, None).await
    }

    /// Stops `name`; with `only`, only if that pid is still its root.
    async fn stop_running(&self, name: &str, only: Option<Pid>) -> Result<(), ApplicationError> {
        let app = self.get(name)?;
        let _transition = app.transition.lock().await;
        let running = {
            let mut running = app.running.lock();
            let replaced = matches!(
                (running.as_ref(), only),
                (Some(current), Some(pid)) if current.process.pid() != pid
            );
            if replaced {
                None
            } else {
                running.take()
            }
        };
        let running = running.ok_or_else(|| ApplicationError::NotRunning(name.to_string()))?;

        running.process.stop(ExitReason::Normal);
        let reason = running.process.wait().await;
        info!(app = %name, %reason, "application stopped");
        Ok(())
    }

    pub(crate) fn loaded(&self) -> Vec<ApplicationInfo> {
        let mut apps: Vec<_> = self.apps.read().values().map(|app| app.info()).collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    pub(crate) fn running(&self) -> Vec<ApplicationInfo> {
        let mut apps = self.loaded();
        apps.retain(ApplicationInfo::is_running);
        apps
    }

    pub(crate) fn info(&self, name: &str) -> Result<ApplicationInfo, ApplicationError> {
        self.get(name).map(|app| app.info())
    }
}

/// Applies the start type once the root exits without being stopped.
async fn watch(node: Node, app: Arc<LoadedApp>, process: Process, start_type: StartType) {
    let reason = process.wait().await;
    let unexpected = {
        let mut running = app.running.lock();
        let current = running
            .as_ref()
            .is_some_and(|r| r.process.pid() == process.pid());
        if current {
            *running = None;
        }
        current
    };
    if !unexpected || !node.is_alive() {
        return;
    }

    let name = &app.spec.name;
    match start_type {
        StartType::Permanent => {
            error!(app = %name, %reason, "permanent application exited, stopping node");
            node.stop();
        }
        StartType::Transient if reason.is_abnormal() => {
            error!(app = %name, %reason, "transient application failed, stopping node");
            node.stop();
        }
        _ => info!(app = %name, %reason, %start_type, "application exited"),
    }
}

async fn expire(node: Node, name: String, pid: Pid, lifespan: Duration) {
    tokio::select! {
        _ = node.root_token().cancelled() => return,
        _ = tokio::time::sleep(lifespan) => {}
    }
    debug!(app = %name, ?lifespan, "application lifespan elapsed");
    if let Err(error) = node.apps().stop_running(&name, Some(pid)).await {
        debug!(app = %name, %error, "lifespan stop skipped");
    }
}

struct AppMaster;

struct MasterArgs {
    app: Arc<dyn Application>,
    spec: ApplicationSpec,
}

struct MasterState {
    name: String,
    sup: Process,
}

#[async_trait]
impl GenServer for AppMaster {
    type State = MasterState;
    type InitArg = MasterArgs;
    type Call = ();
    type Cast = ();
    type Reply = ();

    async fn init(ctx: &mut Context, args: MasterArgs) -> InitResult<MasterState> {
        ctx.set_trap_exit(true);
        let name = args.spec.name.clone();
        let init = SupervisorInit::new(args.spec.flags, args.spec.children.clone());
        let sup = match supervisor::start_link::<SpecSupervisor>(ctx, None, init).await {
            Ok(sup) => sup,
            Err(e) => {
                warn!(app = %name, error = %e, "top supervisor failed to start");
                return InitResult::stop(ExitReason::error(e));
            }
        };

        if let Err(reason) = args.app.start(ctx, &args.spec).await {
            warn!(app = %name, %reason, "application start hook failed");
            shutdown_sup(ctx, &sup).await;
            return InitResult::stop(reason);
        }
        InitResult::ok(MasterState { name, sup })
    }

    async fn handle_call(
        _ctx: &mut Context,
        _request: (),
        _from: From,
        _state: &mut MasterState,
    ) -> CallResult<()> {
        CallResult::reply(())
    }

    async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut MasterState) -> CastResult {
        CastResult::noreply()
    }

    async fn handle_info(_ctx: &mut Context, info: Info, state: &mut MasterState) -> InfoResult {
        match info {
            Info::Exit { from, reason } if from == state.sup.pid() => {
                warn!(app = %state.name, %reason, "top supervisor exited");
                InfoResult::stop(reason)
            }
            _ => InfoResult::NoReply,
        }
    }

    async fn terminate(ctx: &mut Context, reason: &ExitReason, state: &mut MasterState) {
        debug!(app = %state.name, %reason, "application master terminating");
        shutdown_sup(ctx, &state.sup).await;
    }
}

async fn shutdown_sup(ctx: &Context, sup: &Process) {
    ctx.unlink(sup.pid());
    sup.stop(ExitReason::Shutdown);
    sup.wait().await;
}
