// A worker is one resumable handler invocation. An entity keeps a pool of
// these so a handler can suspend mid-body without holding up the queue; the
// pool keeps asking the blocking finishable whether it is done and resumes
// the worker once it is.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::noop_waker;
use tracing::trace;

use crate::events::handler::{HandlerFuture, HandlerResult};
use crate::events::types::Event;
use crate::runtime::finishable::Finishable;

thread_local! {
    // Hand-off slot between a pending `WaitFor` poll and the worker that
    // drove it. Only the entity's own thread touches it.
    static SUSPENSION: RefCell<Option<Finishable>> = const { RefCell::new(None) };
}

fn note_suspension(finishable: Finishable) {
    SUSPENSION.with(|slot| {
        let previous = slot.borrow_mut().replace(finishable);
        debug_assert!(previous.is_none(), "suspension slot already occupied");
    });
}

fn take_suspension() -> Option<Finishable> {
    SUSPENSION.with(|slot| slot.borrow_mut().take())
}

/// Suspends the calling handler until `finishable` reports finished.
/// Execution resumes immediately after the `.await` with all locals intact;
/// other workers keep dispatching in the meantime.
pub fn wait_for(finishable: impl Into<Finishable>) -> WaitFor {
    WaitFor {
        finishable: finishable.into(),
    }
}

/// Suspends the calling handler for at least `duration`. Built on the same
/// mechanism as [`wait_for`] with a deadline finishable.
pub fn wait_delay(duration: Duration) -> WaitFor {
    wait_for(Finishable::delay(duration))
}

/// Future returned by [`wait_for`] / [`wait_delay`].
pub struct WaitFor {
    finishable: Finishable,
}

impl Future for WaitFor {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.finishable.is_finished() {
            Poll::Ready(())
        } else {
            note_suspension(self.finishable.clone());
            Poll::Pending
        }
    }
}

/// A single resumable unit of execution. Holds the handler future while it
/// is in flight and the finishable blocking it while suspended.
pub struct Worker {
    id: u32,
    event: Option<Event>,
    task: Option<HandlerFuture>,
    finishable: Option<Finishable>,
}

impl Worker {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            event: None,
            task: None,
            finishable: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// True while the worker has an unfinished handler body.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// True while the worker is parked on a finishable.
    pub fn is_blocked(&self) -> bool {
        self.finishable.is_some()
    }

    pub(crate) fn blocking_finished(&self) -> bool {
        self.finishable.as_ref().map_or(true, Finishable::is_finished)
    }

    pub(crate) fn clear_block(&mut self) {
        self.finishable = None;
    }

    pub(crate) fn take_event(&mut self) -> Option<Event> {
        self.event.take()
    }

    /// Hands a fresh event to this worker and runs it until it completes or
    /// suspends. Dispatching to a blocked worker is a scheduler bug, never
    /// a recoverable condition.
    pub(crate) fn dispatch(&mut self, event: Event, task: HandlerFuture) -> Option<HandlerResult> {
        assert!(!self.is_blocked(), "workers cannot dispatch while blocked");
        trace!(worker = self.id, event = %event.name, "worker dispatch");
        self.event = Some(event);
        self.task = Some(task);
        self.resume()
    }

    /// Advances the handler body by one poll. Returns the handler's result
    /// once the body runs to completion, or records the blocking finishable
    /// and returns `None` if it suspended.
    pub(crate) fn resume(&mut self) -> Option<HandlerResult> {
        let task = self.task.as_mut().expect("resume called on an idle worker");
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        match task.as_mut().poll(&mut cx) {
            Poll::Ready(result) => {
                self.task = None;
                self.finishable = None;
                Some(result)
            }
            Poll::Pending => {
                let finishable = take_suspension()
                    .expect("handler suspended outside wait_for / wait_delay");
                self.finishable = Some(finishable);
                None
            }
        }
    }
}
