//! Per-execution flow context and its suspension primitives.
//!
//! Every primitive is a future that re-checks its condition each time the
//! engine polls the flow and returns `Pending` otherwise. Nothing registers
//! a waker: progress happens on the next tick.

use crate::flow::acquire;
use crate::{EngineConfig, Flow, FlowError};
use rand::Rng;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tickwork_core::TypeKey;
use tickwork_scope::Scope;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle passed to a running [`Flow`]. Cheap to clone.
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    scope: Scope,
    token: CancellationToken,
    config: EngineConfig,
    disposed: AtomicBool,
}

impl FlowContext {
    /// Root context with a fresh cancellation token.
    pub fn new(scope: Scope, config: EngineConfig) -> Self {
        Self::with_token(scope, config, CancellationToken::new())
    }

    fn with_token(scope: Scope, config: EngineConfig, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                scope,
                token,
                config,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Context whose token is cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self::with_token(
            self.inner.scope.clone(),
            self.inner.config.clone(),
            self.inner.token.child_token(),
        )
    }

    /// Scope flows resolve collaborators from.
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Cancellation signal. Still readable after [`FlowContext::dispose`].
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Request cancellation. No-op once disposed.
    pub fn cancel(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.token.cancel();
    }

    /// Release the context. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Flow context disposed");
    }

    /// Whether [`FlowContext::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Run flow `T` to completion under a child context.
    pub async fn run_child<T: ?Sized + 'static>(&self) -> anyhow::Result<()> {
        self.run_child_key(TypeKey::of::<T>()).await
    }

    /// Run the flow registered as `key` to completion under a child context.
    ///
    /// Prototypes get a fresh instance, singletons are reused. The child
    /// context is disposed when the call returns or is dropped.
    pub async fn run_child_key(&self, key: TypeKey) -> anyhow::Result<()> {
        let flow = acquire(self.scope(), key)?.view::<dyn Flow>()?;
        let child = DisposeOnDrop(self.child());
        debug!("Running child flow {}", key);
        flow.run(&child.0).await
    }

    /// Wait until `condition` holds, using the configured default timeout.
    pub async fn until<F>(&self, condition: F) -> Result<(), FlowError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.until_timeout(condition, self.inner.config.until_timeout)
            .await
    }

    /// Wait until `condition` holds, at most `timeout`.
    pub async fn until_timeout<F>(&self, condition: F, timeout: Duration) -> Result<(), FlowError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        if condition() {
            return Ok(());
        }

        let deadline = deadline_after(timeout);
        poll_fn(|_| {
            if condition() {
                Poll::Ready(Ok(()))
            } else if self.is_cancelled() {
                Poll::Ready(Err(FlowError::Cancelled))
            } else if reached(deadline) {
                Poll::Ready(Err(FlowError::Timeout(timeout)))
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Sleep for `duration` with the configured default jitter.
    pub async fn delay(&self, duration: Duration) -> Result<(), FlowError> {
        self.delay_with_jitter(duration, self.inner.config.jitter)
            .await
    }

    /// Sleep for a random interval in `duration * (1 ± jitter)`, at least 1 ms.
    pub async fn delay_with_jitter(&self, duration: Duration, jitter: f64) -> Result<(), FlowError> {
        let deadline = deadline_after(jittered(duration, jitter));
        poll_fn(|_| {
            if self.is_cancelled() {
                Poll::Ready(Err(FlowError::Cancelled))
            } else if reached(deadline) {
                Poll::Ready(Ok(()))
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("cancelled", &self.is_cancelled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct DisposeOnDrop(FlowContext);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// `None` when `wait` runs past what an [`Instant`] can hold: no deadline.
fn deadline_after(wait: Duration) -> Option<Instant> {
    Instant::now().checked_add(wait)
}

fn reached(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Uniform pick in `[d * (1 - jitter), d * (1 + jitter)]` milliseconds.
///
/// Saturates at `u64::MAX` milliseconds.
pub(crate) fn jittered(duration: Duration, jitter: f64) -> Duration {
    let ms = duration.as_secs_f64() * 1000.0;
    let spread = ms * jitter.clamp(0.0, 1.0);
    let (low, high) = (ms - spread, ms + spread);

    let picked = if high > low {
        rand::thread_rng().gen_range(low..=high)
    } else {
        low
    };

    // Float to int casts saturate
    Duration::from_millis(picked.max(1.0) as u64)
}
