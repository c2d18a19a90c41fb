use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use rhai::Engine;
use tl_core::{Branch, RunError, Step, TlValue};

use super::env::{Environment, EvalContext, Store, VarScope};
use super::eval::build_expression_engine;

/// The branch source. Tree parsing and branchification live outside the
/// engine; this is the seam it consumes.
pub trait Tree {
    /// Next runnable branch, or `None` when the run is over.
    fn next_branch(&mut self) -> Option<Branch>;
    /// Pausing is only legal on a tree holding exactly one branch.
    fn has_one_branch(&self) -> bool;
    /// Synthesizes a branch from an ad-hoc step, resolving function calls
    /// against the steps that already ran. Used by step injection.
    fn branchify(&self, step: Step, context: &[Step]) -> Result<Branch, RunError>;
}

/// Host-provided loader behind the `imp` helper. Loading must be idempotent:
/// the loaded value is cached under a persistent variable and thereby shared
/// across run instances.
pub trait PackageLoader: Send + Sync {
    fn load(&self, package_name: &str) -> Result<TlValue, RunError>;
}

#[derive(Debug, Default)]
pub struct NoopPackageLoader;

impl PackageLoader for NoopPackageLoader {
    fn load(&self, package_name: &str) -> Result<TlValue, RunError> {
        Err(RunError::new(
            "PACKAGE_LOAD",
            format!("No package loader is installed; cannot load \"{}\".", package_name),
        ))
    }
}

/// The slice of runner state one instance consumes. `persistent` is shared
/// by reference across every instance the runner owns; `is_paused` is a
/// write-through mirror for the runner's UI.
#[derive(Clone)]
pub struct RunnerHandle {
    pub persistent: Arc<RwLock<Store>>,
    pub global_init: BTreeMap<String, TlValue>,
    pub pause_on_fail: bool,
    pub console_output: bool,
    pub is_paused: Arc<AtomicBool>,
}

impl Default for RunnerHandle {
    fn default() -> Self {
        Self {
            persistent: Arc::new(RwLock::new(Store::new())),
            global_init: BTreeMap::new(),
            pause_on_fail: false,
            console_output: false,
            is_paused: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub struct RunInstanceOptions {
    pub runner: RunnerHandle,
    pub package_loader: Option<Arc<dyn PackageLoader>>,
}

/// Per-thread test execution state machine. Owns its environment, cursor,
/// and run history exclusively; only `persistent` is shared.
pub struct RunInstance<T: Tree> {
    pub(crate) tree: T,
    pub(crate) runner: RunnerHandle,
    pub(crate) env: Rc<RefCell<Environment>>,
    pub(crate) eval_ctx: Rc<RefCell<EvalContext>>,
    pub(crate) expression_engine: Engine,
    pub(crate) curr_branch: Option<Branch>,
    pub(crate) curr_step_index: usize,
    pub(crate) steps_ran: Vec<Step>,
    pub(crate) paused: bool,
    pub(crate) stopped: Arc<AtomicBool>,
    pub(crate) branch_timer: Option<Instant>,
}

impl<T: Tree> RunInstance<T> {
    pub fn new(tree: T, options: RunInstanceOptions) -> Self {
        let runner = options.runner;
        let env = Rc::new(RefCell::new(Environment::new(Arc::clone(&runner.persistent))));
        let eval_ctx = Rc::new(RefCell::new(EvalContext::default()));
        let package_loader = options
            .package_loader
            .unwrap_or_else(|| Arc::new(NoopPackageLoader));
        let expression_engine = build_expression_engine(&env, &eval_ctx, &package_loader);

        Self {
            tree,
            runner,
            env,
            eval_ctx,
            expression_engine,
            curr_branch: None,
            curr_step_index: 0,
            steps_ran: Vec::new(),
            paused: false,
            stopped: Arc::new(AtomicBool::new(false)),
            branch_timer: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Cooperative stop signal usable from the owning runner's thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Every step actually executed so far, in order, including hooks and
    /// re-runs.
    pub fn steps_ran(&self) -> &[Step] {
        &self.steps_ran
    }

    pub fn curr_branch(&self) -> Option<&Branch> {
        self.curr_branch.as_ref()
    }

    pub fn var_value(&self, scope: VarScope, name: &str) -> Option<TlValue> {
        self.env.borrow().get(scope, name)
    }

    pub(crate) fn set_pause(&mut self) {
        debug_assert!(
            self.tree.has_one_branch(),
            "pause is only legal on a single-branch tree"
        );
        if !self.tree.has_one_branch() {
            return;
        }
        self.paused = true;
        self.runner.is_paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_pause(&mut self) {
        self.paused = false;
        self.runner.is_paused.store(false, Ordering::SeqCst);
    }
}
