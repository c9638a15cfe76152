// A live game entity: one instance of an [`EntityClass`] with its own event
// queue, drain thread, worker pool, and current state. The handle is cheap
// to clone and shares the instance; handlers receive a clone and may call
// back into the entity they run on.

pub mod class;
pub mod state;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::config;
use crate::context::EngineContext;
use crate::entity::class::EntityClass;
use crate::entity::state::State;
use crate::error::EntityError;
use crate::events::handler::HandlerFuture;
use crate::events::registry::{ActiveBinding, InstanceRegistry};
use crate::events::types::{ActionInfo, Event};
use crate::runtime::entity_runtime::EntityRuntime;
use crate::runtime::pool::WorkerPool;

/// Where a state transition should land: a symbol resolved against the
/// entity's class hierarchy, or a state object obtained from it.
pub enum StateTarget {
    Symbol(String),
    State(Arc<State>),
}

impl From<&str> for StateTarget {
    fn from(symbol: &str) -> Self {
        Self::Symbol(symbol.to_string())
    }
}

impl From<String> for StateTarget {
    fn from(symbol: String) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<Arc<State>> for StateTarget {
    fn from(state: Arc<State>) -> Self {
        Self::State(state)
    }
}

/// Shared handle to a live entity.
///
/// Handles obtained from [`Entity::spawn`] (and their clones) own the
/// entity: when the last of them drops, the action-system handlers are
/// removed and the drain thread shuts down. Handles passed into handler
/// bodies and state bodies are non-owning — a worker suspended while
/// holding one does not keep the entity alive, so teardown cannot be
/// deadlocked by the entity's own parked handlers.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
    owner: Option<Arc<OwnerGuard>>,
}

struct EntityInner {
    id: Ulid,
    class: Arc<EntityClass>,
    ctx: EngineContext,
    state: ArcSwapOption<State>,
    data: DashMap<String, Value>,
    registry: InstanceRegistry,
    runtime: EntityRuntime,
}

/// Teardown driver shared by the externally owned handles. Kept apart from
/// `EntityInner` because suspended workers hold `EntityInner` strongly from
/// inside the pool; teardown must trigger on the external count alone.
struct OwnerGuard {
    inner: Arc<EntityInner>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        for entry in self.inner.registry.bindings.iter() {
            self.inner.ctx.actions().remove_action_handler(&entry.handle);
        }
        // The drain thread exits and drops the pool, releasing any
        // suspended workers' handles to the inner state.
        self.inner.runtime.shutdown();
    }
}

impl Entity {
    /// Constructs an entity of `class`: spawns its drain thread (parked),
    /// installs the class's handlers with the action system, and enters the
    /// initial state if the hierarchy declares one. Call
    /// [`start`](Entity::start) to begin processing.
    pub fn spawn(ctx: &EngineContext, class: Arc<EntityClass>) -> Self {
        let thread_name = format!(
            "{}-{}",
            config::threads::ENTITY_THREAD_PREFIX,
            class.name()
        );
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<EntityInner>| {
            let weak = weak.clone();
            let runtime = EntityRuntime::spawn(thread_name, move |event, pool| {
                // The last handle dropping while events are still queued
                // just means nobody is left to observe them.
                if let Some(inner) = weak.upgrade() {
                    Entity { inner, owner: None }.drain_event(event, pool);
                }
            });
            EntityInner {
                id: Ulid::new(),
                class: Arc::clone(&class),
                ctx: ctx.clone(),
                state: ArcSwapOption::empty(),
                data: DashMap::new(),
                registry: InstanceRegistry::new(),
                runtime,
            }
        });

        let entity = Self {
            inner: Arc::clone(&inner),
            owner: Some(Arc::new(OwnerGuard { inner })),
        };
        entity.install_handlers();
        entity.enter_initial_state();
        entity
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn class(&self) -> &Arc<EntityClass> {
        &self.inner.class
    }

    /// The entity's current state, if its hierarchy declares states.
    pub fn current_state(&self) -> Option<Arc<State>> {
        self.inner.state.load_full()
    }

    /// Begins draining the event queue. Idempotent; returns once the drain
    /// thread is accepting dispatches.
    pub fn start(&self) {
        self.inner.runtime.start();
    }

    /// Stops draining after the in-flight event finishes. Queued events and
    /// suspended handlers are preserved for the next `start`.
    pub fn stop(&self) {
        self.inner.runtime.stop();
    }

    pub fn is_running(&self) -> bool {
        self.inner.runtime.is_running()
    }

    /// Enqueues an event directly, bypassing the action system. Callable
    /// from any thread, including this entity's own handlers.
    pub fn push_event(&self, event: Event) {
        self.inner.runtime.push(event);
    }

    /// Invokes a state-sensitive operation through the interception layer.
    /// Returns `Ok(Value::Null)` without running the body when the current
    /// state ignores the operation.
    pub fn invoke(&self, operation: &str, args: &Value) -> Result<Value, EntityError> {
        let op = self.inner.class.find_operation(operation).ok_or_else(|| {
            EntityError::UnknownOperation {
                operation: operation.to_string(),
                class: self.inner.class.name().to_string(),
            }
        })?;

        if let Some(state) = self.current_state() {
            if state.ignores_operation(operation) {
                debug!(
                    entity = %self.inner.id,
                    state = state.symbol(),
                    operation,
                    "operation ignored by state"
                );
                return Ok(Value::Null);
            }
        }

        op(self, args)
    }

    /// Transitions to the named (or given) state. The previous state's
    /// suppressions stop applying immediately; if the new state has a body,
    /// it is queued to run on the entity thread.
    pub fn goto_state(&self, target: impl Into<StateTarget>) -> Result<(), EntityError> {
        let state = self.resolve_target(target.into())?;
        self.set_state_value(state);
        Ok(())
    }

    /// Like [`goto_state`](Entity::goto_state), but an unknown or foreign
    /// target is logged and skipped instead of surfaced.
    pub fn goto_state_silent(&self, target: impl Into<StateTarget>) {
        match self.resolve_target(target.into()) {
            Ok(state) => self.set_state_value(state),
            Err(err) => warn!(entity = %self.inner.id, %err, "state transition skipped"),
        }
    }

    /// Turns delivery of tick events on or off. A no-op (with a log) when
    /// the class hierarchy declares no tick handler.
    pub fn set_ticking(&self, ticking: bool) {
        if !self.inner.class.defines_action(config::events::TICK_ACTION) {
            debug!(
                entity = %self.inner.id,
                class = self.inner.class.name(),
                "class has no tick handler; ignoring tick toggle"
            );
            return;
        }
        self.inner.registry.set_ticking(ticking);
    }

    pub fn is_ticking(&self) -> bool {
        self.inner.registry.is_ticking()
    }

    /// Reads a value from the instance's data map.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.get(key).map(|entry| entry.clone())
    }

    /// Writes a value into the instance's data map.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.data.insert(key.into(), value);
    }

    // -- construction plumbing

    fn install_handlers(&self) {
        for (action, binding) in self.inner.class.collect_bindings() {
            let sender = self.inner.runtime.event_sender();
            let callback = Box::new(move |info: ActionInfo| {
                let _ = sender.send(info.into_event());
            });
            let handle =
                self.inner
                    .ctx
                    .actions()
                    .add_action_handler(&action, &binding.options, callback);
            self.inner.registry.bindings.insert(
                action,
                ActiveBinding {
                    handler: binding.handler,
                    handle,
                },
            );
        }
    }

    fn enter_initial_state(&self) {
        if let Some(state) = self.inner.class.initial_state() {
            self.set_state_value(state);
        }
    }

    fn resolve_target(&self, target: StateTarget) -> Result<Arc<State>, EntityError> {
        match target {
            StateTarget::Symbol(symbol) => {
                self.inner
                    .class
                    .find_state(&symbol)
                    .ok_or_else(|| EntityError::UnknownState {
                        symbol,
                        class: self.inner.class.name().to_string(),
                    })
            }
            StateTarget::State(state) => {
                if self.inner.class.is_or_inherits(state.class_name()) {
                    Ok(state)
                } else {
                    Err(EntityError::ForeignState {
                        symbol: state.symbol().to_string(),
                        owner: state.class_name().to_string(),
                        class: self.inner.class.name().to_string(),
                    })
                }
            }
        }
    }

    fn set_state_value(&self, state: Arc<State>) {
        let symbol = state.symbol().to_string();
        let has_body = state.body().is_some();
        debug!(entity = %self.inner.id, state = %symbol, "entering state");
        self.inner.state.store(Some(state));
        if has_body {
            self.push_event(Event::state_entry(&symbol));
        }
    }

    // -- drain thread

    fn drain_event(&self, event: Event, pool: &mut WorkerPool) {
        let completions = match self.resolve(&event) {
            Some(task) => pool.dispatch(event, task),
            // Dropped events still pump suspended workers forward.
            None => pool.advance(),
        };
        for completion in completions {
            if completion.event.state_symbol().is_some() {
                continue;
            }
            self.inner.registry.apply_result(
                &self.inner.ctx,
                &completion.event.name,
                &completion.result,
            );
        }
    }

    /// Maps an event to the handler future to run, or `None` to drop it.
    fn resolve(&self, event: &Event) -> Option<HandlerFuture> {
        if let Some(symbol) = event.state_symbol() {
            // Run the entry body only if the state is still current; a
            // transition queued behind another transition must not run a
            // stale body.
            let state = self.current_state()?;
            if state.symbol() != symbol {
                debug!(
                    entity = %self.inner.id,
                    queued = symbol,
                    current = state.symbol(),
                    "stale state entry dropped"
                );
                return None;
            }
            let body = state.body()?;
            return Some(body(self.clone()));
        }

        if event.name == config::events::TICK_ACTION && !self.inner.registry.is_ticking() {
            return None;
        }

        if !self.inner.registry.gate_allows(&event.name) {
            debug!(entity = %self.inner.id, action = %event.name, "event gated");
            return None;
        }

        let handler = match self.inner.registry.bindings.get(&event.name) {
            Some(binding) => Arc::clone(&binding.handler),
            None => {
                debug!(entity = %self.inner.id, action = %event.name, "no handler; event dropped");
                return None;
            }
        };
        Some(handler(self.clone(), event.clone()))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.inner.id)
            .field("class", &self.inner.class.name())
            .field(
                "state",
                &self.current_state().map(|s| s.symbol().to_string()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use crate::entity::state::StateOptions;
    use crate::events::handler::{HandlerOptions, HandlerResult};
    use crate::runtime::finishable::Finishable;
    use crate::runtime::worker::{wait_delay, wait_for};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_state_suppresses_listed_operation() {
        let hits = Arc::new(AtomicUsize::new(0));
        let class = {
            let hits = Arc::clone(&hits);
            EntityClass::builder("guard")
                .initial_state("begin", StateOptions::new().ignore("snaz"))
                .state("idle", StateOptions::new())
                .operation("snaz", move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("ran"))
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);

        // Suppressed: succeeds without running the body.
        assert_eq!(entity.invoke("snaz", &Value::Null).unwrap(), Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        entity.goto_state("idle").unwrap();
        assert_eq!(entity.invoke("snaz", &Value::Null).unwrap(), json!("ran"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_operation_is_an_error() {
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, EntityClass::builder("guard").build().unwrap());
        let err = entity.invoke("snaz", &Value::Null).unwrap_err();
        assert!(matches!(err, EntityError::UnknownOperation { .. }));
    }

    #[test]
    fn test_goto_state_rejects_unknown_and_foreign() {
        let (ctx, _router) = EngineContext::with_router();
        let other = EntityClass::builder("other")
            .state("lurk", StateOptions::new())
            .build()
            .unwrap();
        let class = EntityClass::builder("guard")
            .state("idle", StateOptions::new())
            .build()
            .unwrap();
        let entity = Entity::spawn(&ctx, class);

        assert!(matches!(
            entity.goto_state("missing").unwrap_err(),
            EntityError::UnknownState { .. }
        ));
        let foreign = other.find_state("lurk").unwrap();
        assert!(matches!(
            entity.goto_state(foreign).unwrap_err(),
            EntityError::ForeignState { .. }
        ));
        // Silent variant swallows the same failures.
        entity.goto_state_silent("missing");
        assert!(entity.current_state().is_none());

        entity.goto_state("idle").unwrap();
        assert_eq!(entity.current_state().unwrap().symbol(), "idle");
    }

    #[test]
    fn test_events_are_handled_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let class = {
            let order = Arc::clone(&order);
            EntityClass::builder("guard")
                .on_event("step", HandlerOptions::default(), move |_, event| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(event.payload["n"].clone());
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        for n in 0..5 {
            entity.push_event(Event::with_payload("step", json!({ "n": n })));
        }
        entity.start();

        assert!(wait_until(Duration::from_secs(2), || {
            order.lock().unwrap().len() == 5
        }));
        let order = order.lock().unwrap();
        let expected: Vec<Value> = (0..5).map(|n| json!(n)).collect();
        assert_eq!(order.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_suspended_handler_interleaves_with_later_events() {
        init_tracing();
        let order = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(AtomicBool::new(false));
        let class = {
            let order = Arc::clone(&order);
            let sleep_order = Arc::clone(&order);
            let release = Arc::clone(&release);
            EntityClass::builder("guard")
                .on_event("sleep", HandlerOptions::default(), move |_, _| {
                    let order = Arc::clone(&sleep_order);
                    let release = Arc::clone(&release);
                    async move {
                        order.lock().unwrap().push("sleep:start".to_string());
                        let release = Finishable::new(move || release.load(Ordering::SeqCst));
                        wait_for(release).await;
                        order.lock().unwrap().push("sleep:end".to_string());
                        HandlerResult::Continue
                    }
                })
                .on_event("tick", HandlerOptions::default(), move |_, _| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push("tick".to_string());
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();

        entity.push_event(Event::new("sleep"));
        entity.push_event(Event::new("tick"));
        assert!(wait_until(Duration::from_secs(2), || {
            order.lock().unwrap().len() == 2
        }));

        // The sleeper is parked, not lost: release it and pump with another
        // event.
        release.store(true, Ordering::SeqCst);
        entity.push_event(Event::new("tick"));
        assert!(wait_until(Duration::from_secs(2), || {
            order.lock().unwrap().len() == 4
        }));
        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["sleep:start", "tick", "tick", "sleep:end"]
        );
    }

    #[test]
    fn test_stop_preserves_suspended_handler() {
        init_tracing();
        let order = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(AtomicBool::new(false));
        let class = {
            let order = Arc::clone(&order);
            let release = Arc::clone(&release);
            EntityClass::builder("guard")
                .on_event("sleep", HandlerOptions::default(), move |_, _| {
                    let order = Arc::clone(&order);
                    let release = Arc::clone(&release);
                    async move {
                        order.lock().unwrap().push("start");
                        let release = Finishable::new(move || release.load(Ordering::SeqCst));
                        wait_for(release).await;
                        order.lock().unwrap().push("end");
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();
        entity.push_event(Event::new("sleep"));
        assert!(wait_until(Duration::from_secs(2), || {
            order.lock().unwrap().len() == 1
        }));

        entity.stop();
        assert!(wait_until(Duration::from_secs(2), || !entity.is_running()));

        // Release, restart, and pump with a fresh event: the new handler
        // runs straight through, then the parked one finishes.
        release.store(true, Ordering::SeqCst);
        entity.start();
        entity.push_event(Event::new("sleep"));
        assert!(wait_until(Duration::from_secs(2), || {
            order.lock().unwrap().len() == 4
        }));
        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["start", "start", "end", "end"]
        );
    }

    #[test]
    fn test_unknown_event_is_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let class = {
            let hits = Arc::clone(&hits);
            EntityClass::builder("guard")
                .on_event("known", HandlerOptions::default(), move |_, _| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();
        entity.push_event(Event::new("mystery"));
        entity.push_event(Event::new("known"));
        assert!(wait_until(Duration::from_secs(2), || {
            hits.load(Ordering::SeqCst) == 1
        }));
    }

    #[test]
    fn test_wait_delay_result_gates_the_action() {
        let hits = Arc::new(AtomicUsize::new(0));
        let class = {
            let hits = Arc::clone(&hits);
            EntityClass::builder("guard")
                .on_event("jump", HandlerOptions::default(), move |_, _| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        HandlerResult::WaitDelay(Duration::from_secs(60))
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();

        router.fire("jump", 1.0, 0.0);
        assert!(wait_until(Duration::from_secs(2), || {
            hits.load(Ordering::SeqCst) == 1
        }));

        // Gated: further occurrences are dropped, not queued.
        router.fire("jump", 1.0, 0.1);
        router.fire("jump", 1.0, 0.2);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminate_unregisters_the_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let class = {
            let hits = Arc::clone(&hits);
            EntityClass::builder("guard")
                .on_event("jump", HandlerOptions::default(), move |_, _| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        HandlerResult::Terminate
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();
        assert_eq!(router.handler_count("jump"), 1);

        router.fire("jump", 1.0, 0.0);
        assert!(wait_until(Duration::from_secs(2), || {
            router.handler_count("jump") == 0
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tick_toggle_drops_ticks_while_off() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let class = {
            let ticks = Arc::clone(&ticks);
            EntityClass::builder("guard")
                .on_event("tick", HandlerOptions::default(), move |_, _| {
                    let ticks = Arc::clone(&ticks);
                    async move {
                        ticks.fetch_add(1, Ordering::SeqCst);
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();

        router.fire("tick", 0.0, 0.0);
        assert!(wait_until(Duration::from_secs(2), || {
            ticks.load(Ordering::SeqCst) == 1
        }));

        entity.set_ticking(false);
        router.fire("tick", 0.0, 0.1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        entity.set_ticking(true);
        router.fire("tick", 0.0, 0.2);
        assert!(wait_until(Duration::from_secs(2), || {
            ticks.load(Ordering::SeqCst) == 2
        }));
    }

    #[test]
    fn test_tick_toggle_noop_without_tick_handler() {
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, EntityClass::builder("guard").build().unwrap());
        entity.set_ticking(false);
        assert!(entity.is_ticking());
    }

    #[test]
    fn test_initial_state_body_runs_on_start() {
        let entered = Arc::new(AtomicBool::new(false));
        let class = {
            let entered = Arc::clone(&entered);
            EntityClass::builder("guard")
                .initial_state_with("begin", StateOptions::new(), move |entity| {
                    let entered = Arc::clone(&entered);
                    async move {
                        entity.set("woke", json!(true));
                        entered.store(true, Ordering::SeqCst);
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        assert!(!entered.load(Ordering::SeqCst));

        entity.start();
        assert!(wait_until(Duration::from_secs(2), || {
            entered.load(Ordering::SeqCst)
        }));
        assert_eq!(entity.get("woke"), Some(json!(true)));
    }

    #[test]
    fn test_stale_state_body_does_not_run() {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let class = {
            let first = Arc::clone(&ran);
            let second = Arc::clone(&ran);
            EntityClass::builder("guard")
                .state_with("first", StateOptions::new(), move |_| {
                    let ran = Arc::clone(&first);
                    async move {
                        ran.lock().unwrap().push("first");
                    }
                })
                .state_with("second", StateOptions::new(), move |_| {
                    let ran = Arc::clone(&second);
                    async move {
                        ran.lock().unwrap().push("second");
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);

        // Both transitions happen before the thread starts draining, so the
        // first entry event is stale by the time it is popped.
        entity.goto_state("first").unwrap();
        entity.goto_state("second").unwrap();
        entity.start();

        assert!(wait_until(Duration::from_secs(2), || {
            !ran.lock().unwrap().is_empty()
        }));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.lock().unwrap().as_slice(), ["second"]);
    }

    #[test]
    fn test_state_body_can_sleep_and_transition() {
        let class = EntityClass::builder("guard")
            .initial_state_with("begin", StateOptions::new(), move |entity| async move {
                wait_delay(Duration::from_millis(20)).await;
                entity.goto_state_silent("idle");
            })
            .state("idle", StateOptions::new())
            .build()
            .unwrap();
        let (ctx, _router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();

        assert!(wait_until(Duration::from_millis(200), || {
            entity.current_state().map(|s| s.symbol() == "begin") == Some(true)
        }));

        // A later event pumps the parked body past its delay.
        std::thread::sleep(Duration::from_millis(40));
        entity.push_event(Event::new("nudge"));
        assert!(wait_until(Duration::from_secs(2), || {
            entity.current_state().map(|s| s.symbol() == "idle") == Some(true)
        }));
    }

    #[test]
    fn test_drop_with_suspended_worker_tears_down() {
        // The suspended handler body captures its entity handle across the
        // wait; that captured handle must not keep the entity alive once
        // the last spawned handle is gone.
        let suspended = Arc::new(AtomicBool::new(false));
        let class = {
            let suspended = Arc::clone(&suspended);
            EntityClass::builder("guard")
                .on_event("sleep", HandlerOptions::default(), move |entity, _| {
                    let suspended = Arc::clone(&suspended);
                    async move {
                        suspended.store(true, Ordering::SeqCst);
                        wait_for(Finishable::new(|| false)).await;
                        entity.set("late", json!(true));
                        HandlerResult::Continue
                    }
                })
                .build()
                .unwrap()
        };
        let (ctx, router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        entity.start();
        entity.push_event(Event::new("sleep"));
        assert!(wait_until(Duration::from_secs(2), || {
            suspended.load(Ordering::SeqCst)
        }));

        entity.stop();
        assert!(wait_until(Duration::from_secs(2), || !entity.is_running()));

        drop(entity);
        assert!(wait_until(Duration::from_secs(2), || {
            router.handler_count("sleep") == 0
        }));
    }

    #[test]
    fn test_drop_removes_action_handlers() {
        let class = EntityClass::builder("guard")
            .on_event("jump", HandlerOptions::default(), |_, _| async {
                HandlerResult::Continue
            })
            .build()
            .unwrap();
        let (ctx, router) = EngineContext::with_router();
        let entity = Entity::spawn(&ctx, class);
        assert_eq!(router.handler_count("jump"), 1);

        drop(entity);
        assert!(wait_until(Duration::from_secs(2), || {
            router.handler_count("jump") == 0
        }));
    }
}
