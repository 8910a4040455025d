//! Rhai script sessions.
//!
//! A session owns the entity catalog for one scene and runs one script against
//! it. The script is a plain top-level program:
//!
//! ```rhai
//! let pos = #{ x: -5.0, y: 0.0, z: -5.0 };
//! while pos.x < 5.0 {
//!     scene.create(pos);
//!     pos.x += 1.0;
//! }
//! ```
//!
//! The host calls [`ScriptSession::tick`] once per frame. Each tick grants the
//! interpreter a fixed number of evaluation steps (Rhai operations); when they
//! are used up the interpreter is parked mid-script and resumes on the next
//! tick. A script that never ends therefore never stalls the host.
//!
//! The interpreter lives on a worker thread that only runs while the host is
//! waiting on it, so host and script strictly alternate.
//!
//! Available API:
//! - `scene.create/read/update/delete/list` - see [`crate::binder`]
//! - `log.info(value)`, `log.warn(value)`, `log.error(value)`, `print(value)`

use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use crate::binder::{register_scene_api, SceneApi};
use crate::catalog::{Catalog, SharedCatalog};
use crate::config::SessionConfig;
use crate::scene_graph::HostScene;
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};
use crate::script_log::{register_log_api, LogBudget, ScriptLogger};

/// Keep a bounded queue so repeated errors don't grow without limit.
const MAX_DIAGNOSTICS: usize = 32;

/// Termination token returned from the progress callback when the session ends.
const CANCELLED: &str = "session ended";

/// Build an engine with the sandbox limits from `config`.
pub fn sandboxed_engine(config: &SessionConfig) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine
}

enum WorkerEvent {
    /// The script compiled (or failed to); nothing has run yet.
    Compiled(Result<(), ScriptDiagnostic>),
    /// The step budget is spent; the script is parked.
    Yielded,
    /// The script ran to the end, or stopped on an error.
    Finished(Option<ScriptDiagnostic>),
}

/// Worker side of the grant/yield handshake.
struct StepGate {
    grants: Receiver<u64>,
    events: Sender<WorkerEvent>,
    remaining: Cell<u64>,
}

impl StepGate {
    /// Block until the host grants more steps. False once the host is gone.
    fn wait_for_grant(&self) -> bool {
        match self.grants.recv() {
            Ok(steps) => {
                self.remaining.set(steps);
                true
            }
            Err(_) => false,
        }
    }

    /// Consume one step, parking first if the budget is spent.
    fn advance(&self) -> bool {
        while self.remaining.get() == 0 {
            if self.events.send(WorkerEvent::Yielded).is_err() || !self.wait_for_grant() {
                return false;
            }
        }
        self.remaining.set(self.remaining.get() - 1);
        true
    }
}

struct Worker {
    grants: Sender<u64>,
    events: Receiver<WorkerEvent>,
    handle: JoinHandle<()>,
}

fn run_worker<S>(
    source: String,
    catalog: SharedCatalog<S>,
    config: SessionConfig,
    logger: ScriptLogger,
    gate: StepGate,
) where
    S: HostScene + 'static,
{
    let mut engine = sandboxed_engine(&config);
    register_log_api(&mut engine, &logger);
    register_scene_api::<S>(&mut engine);

    let ast = match engine.compile(&source) {
        Ok(ast) => ast,
        Err(e) => {
            let _ = gate.events.send(WorkerEvent::Compiled(Err(from_parse_error(&e))));
            return;
        }
    };
    if gate.events.send(WorkerEvent::Compiled(Ok(()))).is_err() {
        return;
    }

    let gate = Rc::new(gate);
    if !gate.wait_for_grant() {
        return;
    }

    let stepper = Rc::clone(&gate);
    engine.on_progress(move |_| {
        if stepper.advance() {
            None
        } else {
            Some(Dynamic::from(CANCELLED))
        }
    });

    let mut scope = Scope::new();
    scope.push("scene", SceneApi::new(catalog));
    scope.push("log", logger);

    let outcome = match engine.run_ast_with_scope(&mut scope, &ast) {
        Ok(()) => None,
        Err(e) if matches!(*e, EvalAltResult::ErrorTerminated(..)) => {
            log::debug!("Script cancelled");
            return;
        }
        Err(e) => Some(from_eval_error(ScriptPhase::Run, &e)),
    };

    // The host may already be gone; nothing left to report to then.
    let _ = gate.events.send(WorkerEvent::Finished(outcome));
}

/// One scene session: a catalog plus the script driving it.
pub struct ScriptSession<S: HostScene> {
    catalog: SharedCatalog<S>,
    config: SessionConfig,
    log_budget: Arc<LogBudget>,
    worker: Option<Worker>,
    loaded: bool,
    running: bool,
    ticks: u64,
    /// Last error message (for display/debugging)
    pub last_error: Option<String>,
    /// Structured diagnostics for UI consumption.
    diagnostics: Vec<ScriptDiagnostic>,
}

impl<S: HostScene> ScriptSession<S> {
    /// Run host code against the catalog between ticks (rendering, reporting).
    pub fn with_catalog<R>(&self, f: impl FnOnce(&Catalog<S>) -> R) -> R {
        let catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        f(&catalog)
    }

    /// Whether the loaded script still has work left.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a script has been loaded successfully.
    pub fn has_script(&self) -> bool {
        self.loaded
    }

    /// Ticks executed since the current script was loaded.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Drain and return all pending diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<ScriptDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn push_diagnostic(&mut self, diag: ScriptDiagnostic) {
        log::warn!("Script {:?} error: {}", diag.phase, diag.message);
        self.last_error = Some(diag.message.clone());
        self.diagnostics.push(diag);
        if self.diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = self.diagnostics.len() - MAX_DIAGNOSTICS;
            self.diagnostics.drain(0..excess);
        }
    }

    /// Cancel the script (if parked) and wait for the worker to exit.
    fn stop_worker(&mut self) {
        self.running = false;
        if let Some(Worker { grants, events, handle }) = self.worker.take() {
            drop(grants);
            drop(events);
            if handle.join().is_err() {
                log::error!("Script worker panicked");
            }
        }
    }

    /// End the session: stop the script and release every entity.
    pub fn shutdown(&mut self) {
        self.stop_worker();
        self.loaded = false;
        let mut catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        if !catalog.is_empty() {
            log::info!("Releasing {} entities", catalog.len());
        }
        catalog.clear();
    }
}

impl<S> ScriptSession<S>
where
    S: HostScene + Send + 'static,
    S::Node: Send,
{
    pub fn new(scene: S, config: SessionConfig) -> Self {
        let log_budget = Arc::new(LogBudget::new(config.max_logs_per_tick));
        Self {
            catalog: Arc::new(Mutex::new(Catalog::new(scene))),
            config,
            log_budget,
            worker: None,
            loaded: false,
            running: false,
            ticks: 0,
            last_error: None,
            diagnostics: Vec::new(),
        }
    }

    /// Load and compile a script, replacing the current one.
    ///
    /// Entities created by the previous script are released. The new script
    /// does not run until the next tick. Returns false on a compile error.
    pub fn load_script(&mut self, script: &str) -> bool {
        self.shutdown();
        self.last_error = None;
        self.diagnostics.clear();
        self.ticks = 0;

        let (grant_tx, grant_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let gate = StepGate {
            grants: grant_rx,
            events: event_tx,
            remaining: Cell::new(0),
        };

        let source = script.to_string();
        let catalog = Arc::clone(&self.catalog);
        let config = self.config.clone();
        let logger = ScriptLogger::new(Arc::clone(&self.log_budget));

        let spawned = std::thread::Builder::new()
            .name("scene-script".into())
            .stack_size(self.config.worker_stack_size)
            .spawn(move || run_worker(source, catalog, config, logger, gate));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.push_diagnostic(ScriptDiagnostic::host_error(
                    ScriptPhase::Compile,
                    format!("Failed to start script worker: {e}"),
                ));
                return false;
            }
        };

        let compiled = match event_rx.recv() {
            Ok(WorkerEvent::Compiled(result)) => result,
            _ => Err(ScriptDiagnostic::host_error(
                ScriptPhase::Compile,
                "Script worker stopped before compiling",
            )),
        };

        self.worker = Some(Worker {
            grants: grant_tx,
            events: event_rx,
            handle,
        });

        match compiled {
            Ok(()) => {
                self.loaded = true;
                self.running = true;
                log::info!("Script loaded ({} bytes)", script.len());
                true
            }
            Err(diag) => {
                self.stop_worker();
                self.push_diagnostic(diag);
                false
            }
        }
    }

    /// Run one tick with the configured step budget. Returns whether the script is still running.
    pub fn tick(&mut self) -> bool {
        let steps = self.config.steps_per_tick.max(1);
        self.step(steps)
    }

    /// Let the script run for at most `steps` operations.
    pub fn step(&mut self, steps: u64) -> bool {
        if !self.running || steps == 0 {
            return self.running;
        }
        let Some(worker) = &self.worker else {
            return false;
        };

        self.ticks += 1;
        self.log_budget.reset();

        let event = match worker.grants.send(steps) {
            Ok(()) => worker.events.recv().ok(),
            Err(_) => None,
        };

        match event {
            Some(WorkerEvent::Yielded) => true,
            Some(WorkerEvent::Finished(outcome)) => {
                if let Some(diag) = outcome {
                    self.push_diagnostic(diag);
                }
                log::info!("Script finished after {} ticks", self.ticks);
                self.stop_worker();
                false
            }
            Some(WorkerEvent::Compiled(_)) | None => {
                self.push_diagnostic(ScriptDiagnostic::host_error(
                    ScriptPhase::Run,
                    "Script worker stopped unexpectedly",
                ));
                self.stop_worker();
                false
            }
        }
    }

    /// Tick until the script finishes or `max_ticks` have run. Returns the ticks used.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let start = self.ticks;
        while self.ticks - start < max_ticks && self.tick() {}
        self.ticks - start
    }
}

impl<S: HostScene> Drop for ScriptSession<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::catalog::EntityId;
    use crate::scene_graph::{SceneGraph, Transform, Vector3};
    use crate::script_diagnostics::ScriptDiagnosticKind;

    const GRID: &str = include_str!("../demos/grid.rhai");

    fn session(steps_per_tick: u64) -> ScriptSession<SceneGraph> {
        let config = SessionConfig {
            steps_per_tick,
            ..SessionConfig::default()
        };
        ScriptSession::new(SceneGraph::new(), config)
    }

    /// Host scene that only counts live nodes.
    struct CountingScene {
        live: Arc<AtomicUsize>,
    }

    struct CountedNode;

    impl HostScene for CountingScene {
        type Node = CountedNode;

        fn create_node(&mut self, _transform: &Transform) -> CountedNode {
            self.live.fetch_add(1, Ordering::SeqCst);
            CountedNode
        }

        fn attach(&mut self, _node: &CountedNode) {}

        fn update_node(&mut self, _node: &CountedNode, _transform: &Transform) {}

        fn detach(&mut self, _node: CountedNode) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_grid_script_builds_across_ticks() {
        let mut session = session(10);
        assert!(session.load_script(GRID));

        assert!(session.tick());
        let after_first = session.with_catalog(|c| c.len());
        assert!(after_first < 100);

        session.run_until_idle(100_000);
        assert!(!session.is_running());
        assert!(session.ticks() > 10);
        assert!(session.take_diagnostics().is_empty());

        session.with_catalog(|catalog| {
            let ids = catalog.list();
            assert_eq!(ids.len(), 100);
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(catalog.scene().attached_count(), 100);

            let first = catalog.read(EntityId(0)).unwrap();
            assert_eq!(first.position, Vector3::new(-5.0, 0.0, -5.0));
            let second = catalog.read(EntityId(1)).unwrap();
            assert_eq!(second.position, Vector3::new(-5.0, 0.0, -4.0));
            assert!((second.orientation.x - 2.3).abs() < 1e-5);
        });
    }

    #[test]
    fn test_nothing_runs_before_first_tick() {
        let mut session = session(1_000);
        assert!(session.load_script("scene.create();"));
        assert_eq!(session.with_catalog(|c| c.len()), 0);

        assert!(!session.tick());
        assert_eq!(session.with_catalog(|c| c.len()), 1);
    }

    #[test]
    fn test_small_budget_needs_more_ticks() {
        let script = "scene.create(); scene.create(); scene.create(); scene.create(); scene.create();";

        let mut slow = session(1);
        assert!(slow.load_script(script));
        let slow_ticks = slow.run_until_idle(10_000);

        let mut fast = session(10_000);
        assert!(fast.load_script(script));
        let fast_ticks = fast.run_until_idle(10_000);

        assert_eq!(fast_ticks, 1);
        assert!(slow_ticks >= 5);
        assert_eq!(slow.with_catalog(|c| c.len()), 5);
    }

    #[test]
    fn test_endless_script_is_released_on_drop() {
        let live = Arc::new(AtomicUsize::new(0));
        let scene = CountingScene { live: live.clone() };
        let mut session = ScriptSession::new(scene, SessionConfig::default());

        assert!(session.load_script("loop { scene.create(); }"));
        for _ in 0..20 {
            assert!(session.tick());
        }
        assert!(session.is_running());
        assert!(live.load(Ordering::SeqCst) > 0);

        drop(session);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_releases_entities() {
        let mut session = session(10_000);
        assert!(session.load_script("scene.create(); scene.create();"));
        session.run_until_idle(10);
        assert_eq!(session.with_catalog(|c| c.len()), 2);

        session.shutdown();
        assert_eq!(session.with_catalog(|c| c.scene().node_count()), 0);
        assert!(!session.tick());
    }

    #[test]
    fn test_reload_starts_from_empty_scene() {
        let mut session = session(10_000);
        assert!(session.load_script("scene.create(); scene.create(); scene.create();"));
        session.run_until_idle(10);

        assert!(session.load_script("scene.create();"));
        assert_eq!(session.with_catalog(|c| c.len()), 0);
        session.run_until_idle(10);

        // Ids are never reused within a session's catalog.
        assert_eq!(session.with_catalog(|c| c.list()), vec![EntityId(3)]);
    }

    #[test]
    fn test_runtime_error_ends_script_with_diagnostic() {
        let mut session = session(10_000);
        let script = "scene.create();\nlet y = missing_variable + 1;\nscene.create();\n";
        assert!(session.load_script(script));

        assert!(!session.tick());
        assert!(!session.is_running());
        assert!(session.last_error.is_some());

        let diags = session.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].phase, ScriptPhase::Run);
        assert_eq!(diags[0].location.as_ref().map(|l| l.line), Some(2));

        // Work done before the error stays in the scene.
        assert_eq!(session.with_catalog(|c| c.len()), 1);
    }

    #[test]
    fn test_deep_recursion_within_call_limit() {
        let mut session = session(10_000);
        let depth = session.config().max_call_levels - 1;
        let script = format!("fn f(n) {{ if n == 0 {{ 0 }} else {{ 1 + f(n - 1) }} }}\nlet d = f({depth});\nscene.create(#{{ x: d }});");
        assert!(session.load_script(&script));
        session.run_until_idle(10_000);

        assert!(!session.is_running());
        assert!(session.take_diagnostics().is_empty());
        let x = session.with_catalog(|c| c.read(EntityId(0)).map(|t| t.position.x));
        assert_eq!(x, Some(depth as f32));
    }

    #[test]
    fn test_recursion_past_call_limit_is_a_diagnostic() {
        let mut session = session(10_000);
        assert!(session.load_script("fn f(n) { if n == 0 { 0 } else { 1 + f(n - 1) } }\nlet d = f(500);"));
        session.run_until_idle(10_000);

        assert!(!session.is_running());
        let diags = session.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].phase, ScriptPhase::Run);
        assert!(diags[0].message.contains("Stack overflow"));
    }

    #[test]
    fn test_invalid_script() {
        let mut session = session(10);

        assert!(!session.load_script("this is not valid rhai syntax {{{"));
        assert!(session.last_error.is_some());
        assert!(!session.is_running());
        assert!(!session.tick());

        let diags = session.take_diagnostics();
        assert_eq!(diags[0].kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diags[0].phase, ScriptPhase::Compile);
    }

    #[test]
    fn test_scene_misuse_does_not_stop_script() {
        let mut session = session(10_000);
        let script = r#"
            scene.delete(999);
            scene.update(999, #{ x: 1.0 });
            scene.update("nope");
            let gone = scene.read(999);
            scene.create("not a vector", 12, [1, 2, 3]);
            log.info(["absent read:", gone]);
            scene.create(#{ x: 2.0 });
        "#;
        assert!(session.load_script(script));
        session.run_until_idle(10);

        assert!(session.take_diagnostics().is_empty());
        session.with_catalog(|catalog| {
            assert_eq!(catalog.read(EntityId(0)), Some(Transform::default()));
            assert_eq!(catalog.read(EntityId(1)).unwrap().position, Vector3::new(2.0, 0.0, 0.0));
        });
    }

    #[test]
    fn test_tick_without_script() {
        let mut session = session(10);
        assert!(!session.has_script());
        assert!(!session.load_script("let x = ;"));
        assert!(!session.has_script());
        assert!(!session.tick());
        assert_eq!(session.run_until_idle(5), 0);
    }
}
