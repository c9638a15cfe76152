// Explicit engine environment threaded through entity construction and
// dispatch. Lifetime = application lifetime; there is no process-wide
// singleton to reach for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::entity::class::EntityClass;
use crate::events::handler::HandlerOptions;
use crate::events::types::ActionInfo;

/// Opaque token identifying one registered action handler, used to remove
/// it again on `HandlerResult::Terminate` or entity teardown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerHandle {
    id: u64,
    action: String,
}

impl HandlerHandle {
    pub fn new(id: u64, action: impl Into<String>) -> Self {
        Self {
            id,
            action: action.into(),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

/// Callback installed with the action system; invoked with the firing
/// action's payload.
pub type ActionCallback = Box<dyn Fn(ActionInfo) + Send + Sync>;

/// Capability the core needs from the host's input/action system: install
/// a handler for a named action, and remove it again by handle. `options`
/// carry delivery hints such as the minimum interval between invocations.
pub trait ActionSystem: Send + Sync {
    fn add_action_handler(
        &self,
        action: &str,
        options: &HandlerOptions,
        handler: ActionCallback,
    ) -> HandlerHandle;
    fn remove_action_handler(&self, handle: &HandlerHandle);
}

struct RouterEntry {
    id: u64,
    action_speed: f32,
    last_time: Mutex<Option<f64>>,
    callback: ActionCallback,
}

impl RouterEntry {
    /// Applies the handler's `action_speed` throttle against the firing
    /// time, recording the delivery if it goes through.
    fn admits(&self, time: f64) -> bool {
        if self.action_speed <= 0.0 {
            return true;
        }
        let mut last = self.last_time.lock();
        match *last {
            Some(prev) if time - prev < f64::from(self.action_speed) => false,
            _ => {
                *last = Some(time);
                true
            }
        }
    }
}

/// In-process `ActionSystem`: the host engine (or a test) calls `fire` and
/// every handler registered for that action is invoked with the payload,
/// subject to each handler's `action_speed` throttle.
pub struct ActionRouter {
    handlers: DashMap<String, Vec<Arc<RouterEntry>>>,
    next_id: AtomicU64,
}

impl ActionRouter {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invokes every handler registered for `action`.
    pub fn fire(&self, action: &str, value: f64, time: f64) {
        // Clone the entries out so a handler that re-enters the router
        // (terminating itself, registering another) cannot deadlock a
        // shard.
        let entries: Vec<Arc<RouterEntry>> = match self.handlers.get(action) {
            Some(entry) => entry.iter().map(Arc::clone).collect(),
            None => return,
        };
        for entry in entries {
            if entry.admits(time) {
                (entry.callback)(ActionInfo::new(action, value, time));
            }
        }
    }

    /// Number of handlers currently registered for `action`.
    pub fn handler_count(&self, action: &str) -> usize {
        self.handlers.get(action).map_or(0, |entry| entry.len())
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSystem for ActionRouter {
    fn add_action_handler(
        &self,
        action: &str,
        options: &HandlerOptions,
        handler: ActionCallback,
    ) -> HandlerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .entry(action.to_string())
            .or_default()
            .push(Arc::new(RouterEntry {
                id,
                action_speed: options.action_speed,
                last_time: Mutex::new(None),
                callback: handler,
            }));
        HandlerHandle::new(id, action)
    }

    fn remove_action_handler(&self, handle: &HandlerHandle) {
        if let Some(mut entry) = self.handlers.get_mut(handle.action()) {
            entry.retain(|e| e.id != handle.id);
        }
    }
}

/// The explicit environment object: owns the registered entity classes and
/// the action-system handle. Cheap to clone; handed to every entity at
/// construction.
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    actions: Arc<dyn ActionSystem>,
    classes: DashMap<String, Arc<EntityClass>>,
}

impl EngineContext {
    pub fn new(actions: Arc<dyn ActionSystem>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                actions,
                classes: DashMap::new(),
            }),
        }
    }

    /// Context wired to a fresh in-process router, returned alongside it so
    /// the host can fire actions.
    pub fn with_router() -> (Self, Arc<ActionRouter>) {
        let router = Arc::new(ActionRouter::new());
        (Self::new(Arc::clone(&router) as Arc<dyn ActionSystem>), router)
    }

    pub fn actions(&self) -> &Arc<dyn ActionSystem> {
        &self.inner.actions
    }

    /// Registers an entity class. Called once per class at startup, before
    /// any instance is constructed. Re-registering a name replaces it.
    pub fn register_class(&self, class: Arc<EntityClass>) {
        debug!(class = class.name(), "registering entity class");
        self.inner.classes.insert(class.name().to_string(), class);
    }

    pub fn class(&self, name: &str) -> Option<Arc<EntityClass>> {
        self.inner.classes.get(name).map(|entry| Arc::clone(&entry))
    }
}
