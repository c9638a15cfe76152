// Per-entity drain loop: a dedicated thread that owns the worker pool and
// consumes the inbound event queue. Communication is channel-only; the
// queue is the one structure touched by more than one thread.

use std::sync::Arc;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::events::types::Event;
use crate::runtime::pool::WorkerPool;

enum Control {
    Wake,
}

#[derive(Default)]
struct Lifecycle {
    run_requested: bool,
    stop_requested: bool,
    draining: bool,
    shutdown: bool,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    cvar: Condvar,
}

/// Owns an entity's event queue and dedicated thread. `push` is callable
/// from any thread; `start` / `stop` are idempotent lifecycle controls.
/// Dropping the runtime shuts the thread down; suspended workers are
/// dropped with the pool.
pub struct EntityRuntime {
    event_tx: Sender<Event>,
    ctrl_tx: Sender<Control>,
    shared: Arc<Shared>,
}

impl EntityRuntime {
    /// Spawns the drain thread, initially parked. `on_event` runs on that
    /// thread once per popped event, with exclusive access to the pool.
    pub(crate) fn spawn(
        thread_name: String,
        mut on_event: impl FnMut(Event, &mut WorkerPool) + Send + 'static,
    ) -> Self {
        let (event_tx, event_rx) = unbounded::<Event>();
        let (ctrl_tx, ctrl_rx) = unbounded::<Control>();
        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(Lifecycle::default()),
            cvar: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut pool = WorkerPool::new();
                run_drain_loop(&thread_shared, &event_rx, &ctrl_rx, &mut pool, &mut on_event);
                debug!("entity thread exiting");
            });
        if let Err(err) = spawned {
            // Out of threads; the entity exists but can never process
            // events. Surface loudly rather than aborting the process, and
            // mark the lifecycle shut down so start() cannot wait on a
            // drain loop that will never exist.
            warn!(thread = %thread_name, %err, "failed to spawn entity thread");
            shared.lifecycle.lock().shutdown = true;
            shared.cvar.notify_all();
        }

        Self {
            event_tx,
            ctrl_tx,
            shared,
        }
    }

    /// Enqueues an event for later processing. Non-blocking, thread-safe;
    /// events pushed while stopped are kept for the next `start`.
    pub fn push(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn event_sender(&self) -> Sender<Event> {
        self.event_tx.clone()
    }

    /// Begins draining. No-op while already running. Does not return until
    /// the drain loop is ready to accept dispatches, so events pushed
    /// immediately afterwards cannot be lost.
    pub fn start(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.shutdown {
            return;
        }
        // Latching run_requested (even while already draining) closes the
        // race where a stop is observed by the thread after a newer start
        // already cleared the flag; the park loop consumes the latch and
        // resumes immediately. stop() clears it, keeping stop-after-start
        // correct.
        lifecycle.stop_requested = false;
        lifecycle.run_requested = true;
        self.shared.cvar.notify_all();
        while !lifecycle.draining && !lifecycle.shutdown {
            self.shared.cvar.wait(&mut lifecycle);
        }
    }

    /// Requests drain-loop exit after the event currently being dispatched
    /// finishes. In-flight suspended workers stay parked and resume
    /// correctly after a later `start`.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.stop_requested = true;
            lifecycle.run_requested = false;
        }
        // Nudge an idle loop so it parks promptly instead of waiting for
        // the next event.
        let _ = self.ctrl_tx.send(Control::Wake);
    }

    /// True while the drain loop is accepting dispatches.
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.lock().draining
    }

    /// Permanently shuts the drain thread down. The thread exits after the
    /// event currently being dispatched; the pool (and any suspended
    /// workers) is dropped with it.
    pub(crate) fn shutdown(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.shutdown = true;
        }
        self.shared.cvar.notify_all();
        let _ = self.ctrl_tx.send(Control::Wake);
    }
}

impl Drop for EntityRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_drain_loop(
    shared: &Shared,
    event_rx: &Receiver<Event>,
    ctrl_rx: &Receiver<Control>,
    pool: &mut WorkerPool,
    on_event: &mut impl FnMut(Event, &mut WorkerPool),
) {
    loop {
        // Park until started.
        {
            let mut lifecycle = shared.lifecycle.lock();
            lifecycle.draining = false;
            shared.cvar.notify_all();
            while !lifecycle.run_requested && !lifecycle.shutdown {
                shared.cvar.wait(&mut lifecycle);
            }
            if lifecycle.shutdown {
                return;
            }
            lifecycle.run_requested = false;
            lifecycle.draining = true;
            shared.cvar.notify_all();
        }

        // Drain until stopped. The stop flag is only observed between
        // events, so the event being dispatched always finishes.
        loop {
            {
                let lifecycle = shared.lifecycle.lock();
                if lifecycle.stop_requested || lifecycle.shutdown {
                    break;
                }
            }
            select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => on_event(event, pool),
                    Err(_) => return,
                },
                recv(ctrl_rx) -> msg => match msg {
                    // Loop around and re-check the lifecycle flags.
                    Ok(Control::Wake) => {}
                    Err(_) => return,
                },
            }
        }
    }
}
