// Per-instance handler bookkeeping: which bindings are live, which actions
// are gated behind an unfinished finishable, and whether tick events are
// admitted. Shared between the entity handle and its drain thread.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::context::{EngineContext, HandlerHandle};
use crate::events::handler::{HandlerFn, HandlerResult};
use crate::runtime::finishable::Finishable;

/// A class binding as installed on one live entity, together with the
/// handle the external action system returned for it.
pub(crate) struct ActiveBinding {
    pub handler: HandlerFn,
    pub handle: HandlerHandle,
}

/// Instance-local registry. `ticking` defaults to on so a class that
/// declares a tick handler starts receiving ticks without further setup.
pub(crate) struct InstanceRegistry {
    pub bindings: DashMap<String, ActiveBinding>,
    gates: DashMap<String, Finishable>,
    ticking: AtomicBool,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            gates: DashMap::new(),
            ticking: AtomicBool::new(true),
        }
    }

    /// True if no unfinished gate is pending for `action`. A finished gate
    /// is removed on the way out.
    pub fn gate_allows(&self, action: &str) -> bool {
        let finished = match self.gates.get(action) {
            Some(gate) => gate.is_finished(),
            None => return true,
        };
        // Ref dropped above; safe to mutate the map.
        if finished {
            self.gates.remove(action);
        }
        finished
    }

    /// Applies a completed handler's verdict: install a gate, tear the
    /// binding down, or neither.
    pub fn apply_result(&self, ctx: &EngineContext, action: &str, result: &HandlerResult) {
        if let Some(gate) = result.gate() {
            self.gates.insert(action.to_string(), gate);
            return;
        }
        if matches!(result, HandlerResult::Terminate) {
            debug!(action, "handler terminated");
            if let Some((_, binding)) = self.bindings.remove(action) {
                ctx.actions().remove_action_handler(&binding.handle);
            }
            self.gates.remove(action);
        }
    }

    pub fn set_ticking(&self, ticking: bool) {
        self.ticking.store(ticking, Ordering::SeqCst);
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }
}
