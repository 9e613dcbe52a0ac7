//! The tree engine - evaluates the selection tree and drives flows.

use crate::flow::acquire;
use crate::guard::guarded;
use crate::{Branch, BranchContext, FlowEntry, FlowStatus, RootBranch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tickwork_core::TypeKey;
use tickwork_scope::{Scope, ScopeError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shortest interval [`TreeEngine::run`] ticks at.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the tree engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest branch nesting evaluated; deeper subtrees are skipped
    pub max_depth: usize,
    /// Default timeout for [`FlowContext::until`](crate::FlowContext::until)
    #[serde(rename = "until_timeout_ms", with = "millis")]
    pub until_timeout: Duration,
    /// Default jitter fraction for [`FlowContext::delay`](crate::FlowContext::delay)
    pub jitter: f64,
    /// Interval between ticks when driven by [`TreeEngine::run`], at least
    /// [`MIN_TICK_INTERVAL`]
    #[serde(rename = "tick_interval_ms", with = "millis")]
    pub tick_interval: Duration,
    /// Ticks before [`TreeEngine::run`] returns (None = until shutdown)
    pub max_ticks: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            until_timeout: Duration::from_secs(5 * 60),
            jitter: 0.25,
            tick_interval: Duration::from_millis(100),
            max_ticks: None,
        }
    }
}

impl EngineConfig {
    /// Set the maximum branch depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the default `until` timeout.
    pub fn with_until_timeout(mut self, timeout: Duration) -> Self {
        self.until_timeout = timeout;
        self
    }

    /// Set the default delay jitter.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the tick interval used by [`TreeEngine::run`].
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Stop [`TreeEngine::run`] after this many ticks.
    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Errors creating a tree engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Zero or several singletons provide `RootBranch`
    #[error("Cannot locate root branch: {0}")]
    Root(#[from] ScopeError),
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, 0 when the engine was stopped
    pub tick: u64,
    /// Flows created this tick
    pub started: Vec<TypeKey>,
    /// Running flows polled again
    pub resumed: Vec<TypeKey>,
    /// Finished flows replaced by a fresh execution
    pub restarted: Vec<TypeKey>,
    /// Flows no longer declared
    pub cancelled: Vec<TypeKey>,
    /// Flows that could not be created, retried next tick
    pub failed: Vec<TypeKey>,
}

impl TickReport {
    /// Whether the tick changed or polled nothing.
    pub fn is_idle(&self) -> bool {
        self.started.is_empty()
            && self.resumed.is_empty()
            && self.restarted.is_empty()
            && self.cancelled.is_empty()
            && self.failed.is_empty()
    }
}

/// The tree engine.
///
/// Every tick:
/// ```text
/// Walk tree → Diff active set → Cancel → Start → Continue → Restart
/// ```
pub struct TreeEngine {
    scope: Scope,
    root: TypeKey,
    config: EngineConfig,
    active: BTreeMap<TypeKey, FlowEntry>,
    previous: BTreeSet<TypeKey>,
    running: bool,
    ticks: u64,
}

impl TreeEngine {
    /// Create an engine rooted at the single `RootBranch` singleton.
    pub fn new(scope: Scope) -> Result<Self, EngineError> {
        let root = scope.singleton_type_of(TypeKey::of::<dyn RootBranch>())?;
        debug!("Tree engine rooted at {}", root);

        Ok(Self {
            scope,
            root,
            config: EngineConfig::default(),
            active: BTreeMap::new(),
            previous: BTreeSet::new(),
            running: false,
            ticks: 0,
        })
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable ticking. Idempotent.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.previous.clear();
        self.active.clear();
        info!("Tree engine started at {}", self.root);
    }

    /// Stop every active flow and disable ticking. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        for (_, mut entry) in std::mem::take(&mut self.active) {
            entry.stop();
        }
        self.previous.clear();
        info!("Tree engine stopped after {} ticks", self.ticks);
    }

    /// Run one tick. Does nothing while stopped.
    pub fn tick(&mut self) -> TickReport {
        if !self.running {
            return TickReport::default();
        }

        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            ..Default::default()
        };

        // 1. Walk the tree and collect the active set
        let mut ctx = BranchContext::new(&self.scope);
        self.evaluate(self.root, &mut ctx, 0);
        let mut current = ctx.into_flows();

        // 2. Diff against the previous tick
        let to_cancel: Vec<TypeKey> = self.previous.difference(&current).copied().collect();
        let to_start: Vec<TypeKey> = current.difference(&self.previous).copied().collect();
        let to_continue: Vec<TypeKey> = self.previous.intersection(&current).copied().collect();

        // 3. Cancel flows no longer declared
        for key in to_cancel {
            if let Some(mut entry) = self.active.remove(&key) {
                entry.stop();
                report.cancelled.push(key);
            }
        }

        // 4. Start newly declared flows
        for key in to_start {
            match FlowEntry::create(&self.scope, key, &self.config) {
                Ok(mut entry) => {
                    entry.resume();
                    self.active.insert(key, entry);
                    report.started.push(key);
                }
                Err(e) => {
                    error!("Failed to create flow {}: {:#}", key, e);
                    current.remove(&key);
                    report.failed.push(key);
                }
            }
        }

        // 5. Note which continuing flows finished before this tick,
        //    so one completing during its resume below is not restarted
        let finished_before: Vec<TypeKey> = to_continue
            .iter()
            .copied()
            .filter(|key| self.active.get(key).is_some_and(FlowEntry::is_finished))
            .collect();

        // 6. Resume continuing flows
        for key in &to_continue {
            if let Some(entry) = self.active.get_mut(key) {
                if !entry.is_finished() {
                    entry.resume();
                    report.resumed.push(*key);
                }
            }
        }

        // 7. Replace flows that finished on an earlier tick but are still declared
        for key in finished_before {
            if let Some(mut old) = self.active.remove(&key) {
                old.stop();
            }

            match FlowEntry::create(&self.scope, key, &self.config) {
                Ok(mut entry) => {
                    entry.resume();
                    self.active.insert(key, entry);
                    report.restarted.push(key);
                }
                Err(e) => {
                    error!("Failed to restart flow {}: {:#}", key, e);
                    current.remove(&key);
                    report.failed.push(key);
                }
            }
        }

        // 8. Remember this tick's set
        self.previous = current;

        if !report.is_idle() {
            debug!(
                "Tick {}: {} started, {} resumed, {} restarted, {} cancelled, {} failed",
                report.tick,
                report.started.len(),
                report.resumed.len(),
                report.restarted.len(),
                report.cancelled.len(),
                report.failed.len()
            );
        }

        report
    }

    fn evaluate(&self, key: TypeKey, ctx: &mut BranchContext<'_>, depth: usize) {
        if depth >= self.config.max_depth {
            error!("Max branch depth ({}) exceeded at {}", self.config.max_depth, key);
            return;
        }

        let branch = match acquire(&self.scope, key).and_then(|i| i.view::<dyn Branch>()) {
            Ok(branch) => branch,
            Err(e) => {
                error!("Failed to resolve branch {}: {}", key, e);
                return;
            }
        };

        let snapshot = ctx.snapshot();
        if let Err(e) = guarded(|| branch.tick(ctx)) {
            error!("Branch {} tick failed: {:#}", key, e);
            ctx.rollback(snapshot);
            return;
        }

        // Drain before recursing so each child only sees its own children
        for child in ctx.take_nested() {
            self.evaluate(child, ctx, depth + 1);
        }
    }

    /// Start the engine and tick on `config.tick_interval` until
    /// `config.max_ticks` is reached or `shutdown` is cancelled, then stop.
    ///
    /// Returns the number of ticks run.
    pub async fn run(&mut self, shutdown: CancellationToken) -> u64 {
        self.start();

        // A zero period would make `interval` panic
        let period = self.config.tick_interval.max(MIN_TICK_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let first = self.ticks;

        loop {
            if let Some(max) = self.config.max_ticks {
                if self.ticks - first >= max {
                    info!("Reached max ticks ({})", max);
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.stop();
        self.ticks - first
    }

    /// Whether the engine is started.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Root branch type.
    pub fn root(&self) -> TypeKey {
        self.root
    }

    /// Get a reference to the scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Flow types with a live entry.
    pub fn active_keys(&self) -> Vec<TypeKey> {
        self.active.keys().copied().collect()
    }

    /// Names of flow types with a live entry.
    pub fn active_flows(&self) -> Vec<String> {
        self.active.keys().map(|k| k.to_string()).collect()
    }

    /// Status of the entry for `key`, if any.
    pub fn flow_status(&self, key: TypeKey) -> Option<FlowStatus> {
        self.active.get(&key).map(FlowEntry::status)
    }
}

impl Drop for TreeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TreeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeEngine")
            .field("root", &self.root)
            .field("running", &self.running)
            .field("ticks", &self.ticks)
            .field("active", &self.active_flows())
            .finish()
    }
}
