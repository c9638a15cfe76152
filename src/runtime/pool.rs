// Per-entity cooperative scheduler. The pool partitions its workers into
// free / running / blocked; every worker is in exactly one of the three at
// any observation point, and a worker carries a finishable iff it is
// blocked.

use tracing::trace;

use crate::events::handler::{HandlerFuture, HandlerResult};
use crate::events::types::Event;
use crate::runtime::worker::Worker;

/// A handler body that ran to completion during a dispatch cycle, paired
/// with the event that started it.
#[derive(Debug)]
pub struct Completion {
    pub event: Event,
    pub result: HandlerResult,
}

/// Scheduler for one entity's workers. Grows without an upper bound: a new
/// worker is created whenever an event arrives while every existing worker
/// is busy, trading memory for guaranteed forward progress under many
/// concurrently blocked handlers.
pub struct WorkerPool {
    free: Vec<Worker>,
    running: Vec<Worker>,
    blocked: Vec<Worker>,
    next_worker_id: u32,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            running: Vec::new(),
            blocked: Vec::new(),
            next_worker_id: 0,
        }
    }

    /// Runs one full dispatch cycle, in fixed order: hand `event` to a free
    /// worker and run it until it completes or suspends, promote blocked
    /// workers whose finishable is now done, resume every running worker
    /// exactly once, then reclassify. Returns every handler body that
    /// finished during the cycle.
    pub fn dispatch(&mut self, event: Event, task: HandlerFuture) -> Vec<Completion> {
        let mut lead = self.obtain_worker();

        let mut completions = Vec::new();
        if let Some(result) = lead.dispatch(event, task) {
            let event = lead.take_event().expect("finished worker lost its event");
            completions.push(Completion { event, result });
        }

        completions.extend(self.advance());

        if lead.is_running() {
            // implies blocked: it suspended during its first run
            self.blocked.push(lead);
        } else {
            self.free.push(lead);
        }

        trace!(
            free = self.free.len(),
            blocked = self.blocked.len(),
            total = self.next_worker_id,
            "pool state"
        );
        completions
    }

    /// Promotes unblocked workers and resumes every running worker once,
    /// without dispatching a new event. The drain loop calls this when an
    /// event is gated or unknown so suspended handlers still progress.
    pub fn advance(&mut self) -> Vec<Completion> {
        let (unblocked, still_blocked): (Vec<_>, Vec<_>) = self
            .blocked
            .drain(..)
            .partition(Worker::blocking_finished);
        self.blocked = still_blocked;

        for mut worker in unblocked {
            worker.clear_block();
            self.running.push(worker);
        }

        let mut completions = Vec::new();
        for mut worker in std::mem::take(&mut self.running) {
            match worker.resume() {
                Some(result) => {
                    let event = worker
                        .take_event()
                        .expect("finished worker lost its event");
                    completions.push(Completion { event, result });
                    self.free.push(worker);
                }
                // suspended again on a new finishable
                None => self.blocked.push(worker),
            }
        }

        completions
    }

    fn obtain_worker(&mut self) -> Worker {
        match self.free.pop() {
            Some(worker) => worker,
            None => {
                self.next_worker_id += 1;
                trace!(worker = self.next_worker_id, "pool grows");
                Worker::new(self.next_worker_id)
            }
        }
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    /// Total workers ever created for this pool.
    pub fn worker_count(&self) -> usize {
        self.next_worker_id as usize
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
