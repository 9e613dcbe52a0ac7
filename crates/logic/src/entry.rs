//! One execution of a flow: the instance, its context and its task.

use crate::flow::acquire;
use crate::guard::{guarded, panic_message};
use crate::{EngineConfig, Flow, FlowContext};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};
use tickwork_core::{RunId, TypeKey};
use tickwork_scope::Scope;
use tracing::{debug, error};

/// Snapshot of a running flow for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStatus {
    /// Flow type name
    pub flow: String,
    /// Execution identifier
    pub run_id: RunId,
    /// When this execution was created
    pub started_at: DateTime<Utc>,
    /// Times the task was polled
    pub resumes: u64,
    /// Whether the task completed
    pub finished: bool,
}

/// Binds a flow instance to its context and cooperative task.
pub struct FlowEntry {
    key: TypeKey,
    run_id: RunId,
    started_at: DateTime<Utc>,
    flow: Arc<dyn Flow>,
    context: FlowContext,
    task: Option<BoxFuture<'static, anyhow::Result<()>>>,
    finished: bool,
    stopped: bool,
    resumes: u64,
}

impl FlowEntry {
    /// Wrap `flow` in a new execution. The task is not polled yet.
    pub fn new(key: TypeKey, flow: Arc<dyn Flow>, context: FlowContext) -> Self {
        let task = {
            let flow = flow.clone();
            let ctx = context.clone();
            async move { flow.run(&ctx).await }.boxed()
        };

        Self {
            key,
            run_id: RunId::new(),
            started_at: Utc::now(),
            flow,
            context,
            task: Some(task),
            finished: false,
            stopped: false,
            resumes: 0,
        }
    }

    /// Obtain the flow registered as `key` and wrap it under a root context.
    pub(crate) fn create(scope: &Scope, key: TypeKey, config: &EngineConfig) -> anyhow::Result<Self> {
        let flow = acquire(scope, key)?.view::<dyn Flow>()?;
        let entry = Self::new(key, flow, FlowContext::new(scope.clone(), config.clone()));
        debug!("Created flow {} ({})", key, entry.run_id);
        Ok(entry)
    }

    /// Flow type.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Execution identifier.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Whether the task completed, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether [`FlowEntry::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Context handed to the flow.
    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    /// Current status.
    pub fn status(&self) -> FlowStatus {
        FlowStatus {
            flow: self.key.to_string(),
            run_id: self.run_id,
            started_at: self.started_at,
            resumes: self.resumes,
            finished: self.finished,
        }
    }

    /// Poll the task once. No-op when finished or stopped.
    pub fn resume(&mut self) {
        if self.finished {
            return;
        }
        let Some(task) = self.task.as_mut() else {
            return;
        };

        self.resumes += 1;
        let mut cx = Context::from_waker(noop_waker_ref());
        let polled = catch_unwind(AssertUnwindSafe(|| task.as_mut().poll(&mut cx)));

        match polled {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(Ok(()))) => {
                debug!("Flow {} finished after {} resumes ({})", self.key, self.resumes, self.run_id);
            }
            Ok(Poll::Ready(Err(e))) => {
                error!("Flow {} failed ({}): {:#}", self.key, self.run_id, e);
            }
            Err(panic) => {
                error!(
                    "Flow {} panicked ({}): {}",
                    self.key,
                    self.run_id,
                    panic_message(panic.as_ref())
                );
            }
        }

        self.finished = true;
        self.task = None;
    }

    /// Cancel and release the execution. Idempotent.
    ///
    /// An unfinished flow gets its token cancelled and `on_cancel` called
    /// exactly once. The task and context are released either way.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if !self.finished {
            self.context.cancel();
            if let Err(e) = guarded(|| self.flow.on_cancel()) {
                error!("Flow {} on_cancel failed ({}): {:#}", self.key, self.run_id, e);
            }
        }

        self.task = None;
        self.context.dispose();
        debug!("Stopped flow {} ({})", self.key, self.run_id);
    }
}

impl Drop for FlowEntry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FlowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEntry")
            .field("key", &self.key)
            .field("run_id", &self.run_id)
            .field("resumes", &self.resumes)
            .field("finished", &self.finished)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::future::poll_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        polls: AtomicUsize,
        cancels: AtomicUsize,
        finish_after: usize,
    }

    #[async_trait]
    impl Flow for Counter {
        async fn run(&self, _ctx: &FlowContext) -> anyhow::Result<()> {
            poll_fn(|_| {
                let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= self.finish_after {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            })
            .await;
            Ok(())
        }

        fn on_cancel(&self) -> anyhow::Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cleanup failed")
        }
    }

    struct Failing;

    #[async_trait]
    impl Flow for Failing {
        async fn run(&self, _ctx: &FlowContext) -> anyhow::Result<()> {
            anyhow::bail!("no target")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Flow for Panicking {
        async fn run(&self, _ctx: &FlowContext) -> anyhow::Result<()> {
            panic!("flow exploded")
        }
    }

    fn entry(flow: Arc<dyn Flow>) -> FlowEntry {
        let scope = Scope::builder().build().unwrap();
        FlowEntry::new(
            TypeKey::of::<Counter>(),
            flow,
            FlowContext::new(scope, EngineConfig::default()),
        )
    }

    fn counter(finish_after: usize) -> Arc<Counter> {
        Arc::new(Counter {
            finish_after,
            ..Default::default()
        })
    }

    #[test]
    fn test_resume_polls_once() {
        let flow = counter(3);
        let mut entry = entry(flow.clone());

        entry.resume();
        entry.resume();
        assert!(!entry.is_finished());
        assert_eq!(flow.polls.load(Ordering::SeqCst), 2);

        entry.resume();
        assert!(entry.is_finished());

        entry.resume();
        assert_eq!(flow.polls.load(Ordering::SeqCst), 3);
        assert_eq!(entry.status().resumes, 3);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let flow = counter(10);
        let mut entry = entry(flow.clone());
        entry.resume();

        entry.stop();
        entry.stop();
        drop(entry);

        assert_eq!(flow.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_cancels_and_disposes() {
        let mut entry = entry(counter(10));
        let ctx = entry.context().clone();
        entry.resume();
        entry.stop();

        assert!(ctx.is_cancelled());
        assert!(ctx.is_disposed());
        assert!(entry.is_stopped());

        entry.resume();
        assert_eq!(entry.status().resumes, 1);
    }

    #[test]
    fn test_stop_after_finish_skips_on_cancel() {
        let flow = counter(1);
        let mut entry = entry(flow.clone());
        let ctx = entry.context().clone();

        entry.resume();
        assert!(entry.is_finished());
        entry.stop();

        assert_eq!(flow.cancels.load(Ordering::SeqCst), 0);
        assert!(!ctx.is_cancelled());
        assert!(ctx.is_disposed());
    }

    #[test]
    fn test_error_finishes_entry() {
        let mut entry = entry(Arc::new(Failing));
        entry.resume();
        assert!(entry.is_finished());
    }

    #[test]
    fn test_panic_finishes_entry() {
        let mut entry = entry(Arc::new(Panicking));
        entry.resume();
        assert!(entry.is_finished());
    }
}
