// Handler return protocol and handler type aliases.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::entity::Entity;
use crate::events::types::Event;
use crate::runtime::finishable::Finishable;

/// What a handler's return value instructs the registry to do next.
///
/// `WaitFor` and `WaitDelay` gate the *handler*: events for the same action
/// are dropped until the finishable reports finished. `Terminate`
/// unregisters the handler so it never runs again for this instance.
#[derive(Debug, Clone)]
pub enum HandlerResult {
    Continue,
    WaitFor(Finishable),
    WaitDelay(Duration),
    Terminate,
}

impl HandlerResult {
    /// The gate finishable this result installs, if any.
    pub(crate) fn gate(&self) -> Option<Finishable> {
        match self {
            Self::WaitFor(f) => Some(f.clone()),
            Self::WaitDelay(d) => Some(Finishable::delay(*d)),
            Self::Continue | Self::Terminate => None,
        }
    }
}

/// One in-flight handler invocation. Not `Send`: futures are created,
/// polled, and dropped on the owning entity's thread only.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult>>>;

/// A handler body declared on an entity class. Shared across instances and
/// threads; invoked on the entity thread to produce the per-event future.
pub type HandlerFn = Arc<dyn Fn(Entity, Event) -> HandlerFuture + Send + Sync>;

/// A state entry body. Produces a resumable future run when the entity
/// enters the state.
pub type StateBodyFn = Arc<dyn Fn(Entity) -> HandlerFuture + Send + Sync>;

/// Registration options carried with each declared handler.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Minimum seconds between invocations, forwarded to the external
    /// action system. Zero means every occurrence is delivered.
    pub action_speed: f32,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self { action_speed: 0.0 }
    }
}
