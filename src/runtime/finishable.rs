// Completion predicates workers block on while suspended.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capability interface for "an operation that can complete": a timer
/// elapsing, an external animation finishing, a flag flipping. Evaluation
/// must be side-effect free; the pool re-checks it on every dispatch cycle.
pub trait Finish: Send + Sync {
    fn is_finished(&self) -> bool;
}

/// Cheap-clone handle to a completion predicate. Owned by the worker that
/// is waiting on it while that worker sits in the pool's blocked set.
#[derive(Clone)]
pub struct Finishable(Arc<dyn Finish>);

impl Finishable {
    /// Finishable backed by a plain closure predicate.
    pub fn new(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(PredicateFinish(predicate)))
    }

    /// Wraps any `Finish` implementation.
    pub fn wrap(inner: impl Finish + 'static) -> Self {
        Self(Arc::new(inner))
    }

    /// Finishable that completes once `duration` has elapsed from now.
    pub fn delay(duration: Duration) -> Self {
        Self::wrap(DelayFinish {
            deadline: Instant::now() + duration,
        })
    }

    /// Already-completed finishable.
    pub fn ready() -> Self {
        Self::new(|| true)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<F: Finish + 'static> From<F> for Finishable {
    fn from(inner: F) -> Self {
        Self::wrap(inner)
    }
}

impl fmt::Debug for Finishable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finishable")
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct PredicateFinish<F>(F);

impl<F: Fn() -> bool + Send + Sync> Finish for PredicateFinish<F> {
    fn is_finished(&self) -> bool {
        (self.0)()
    }
}

/// Deadline-based finishable backing `wait_delay` and
/// `HandlerResult::WaitDelay`.
struct DelayFinish {
    deadline: Instant,
}

impl Finish for DelayFinish {
    fn is_finished(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
