// Per-entity-class dispatch table: operations, event bindings, and the
// state table, built once at startup with an explicit builder. Lookup walks
// the parent chain; the nearest declaration wins, so re-declaring an
// operation or binding in a subclass replaces the inherited one rather
// than stacking on top of it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::state::{State, StateOptions, StateTable};
use crate::entity::Entity;
use crate::error::EntityError;
use crate::events::handler::{HandlerFn, HandlerOptions, HandlerResult, StateBodyFn};
use crate::events::types::Event;

/// A state-sensitive operation body. Receives the entity and the caller's
/// arguments once the interception layer has let the call through.
pub type OpFn = Arc<dyn Fn(&Entity, &Value) -> Result<Value, EntityError> + Send + Sync>;

/// One declared `on_event` binding: action name, handler body, and the
/// options forwarded to the external action system at registration time.
#[derive(Clone)]
pub struct HandlerBinding {
    pub action: String,
    pub handler: HandlerFn,
    pub options: HandlerOptions,
}

/// Immutable per-class data shared by every instance of the class.
pub struct EntityClass {
    name: String,
    parent: Option<Arc<EntityClass>>,
    states: StateTable,
    ops: HashMap<String, OpFn>,
    bindings: HashMap<String, HandlerBinding>,
}

impl EntityClass {
    pub fn builder(name: impl Into<String>) -> EntityClassBuilder {
        EntityClassBuilder {
            name: name.into(),
            parent: None,
            ops: Vec::new(),
            states: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<EntityClass>> {
        self.parent.as_ref()
    }

    /// Resolves a state symbol on this class or the nearest ancestor that
    /// declares it (subclass states shadow superclass states).
    pub fn find_state(&self, symbol: &str) -> Option<Arc<State>> {
        match self.states.get(symbol) {
            Some(state) => Some(Arc::clone(state)),
            None => self.parent.as_ref().and_then(|p| p.find_state(symbol)),
        }
    }

    /// The nearest ancestor-declared initial state. A class hierarchy with
    /// no declared states has none; states are then unused for it.
    pub fn initial_state(&self) -> Option<Arc<State>> {
        match self.states.initial() {
            Some(state) => Some(Arc::clone(state)),
            None => self.parent.as_ref().and_then(|p| p.initial_state()),
        }
    }

    pub(crate) fn find_operation(&self, name: &str) -> Option<OpFn> {
        match self.ops.get(name) {
            Some(op) => Some(Arc::clone(op)),
            None => self.parent.as_ref().and_then(|p| p.find_operation(name)),
        }
    }

    /// True if this class or an ancestor declares a handler for `action`.
    pub fn defines_action(&self, action: &str) -> bool {
        self.bindings.contains_key(action)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.defines_action(action))
    }

    /// All bindings visible on this class, leaf declarations shadowing
    /// inherited ones.
    pub(crate) fn collect_bindings(&self) -> HashMap<String, HandlerBinding> {
        let mut bindings = match &self.parent {
            Some(parent) => parent.collect_bindings(),
            None => HashMap::new(),
        };
        for (action, binding) in &self.bindings {
            bindings.insert(action.clone(), binding.clone());
        }
        bindings
    }

    /// True if `class_name` names this class or one of its ancestors.
    pub fn is_or_inherits(&self, class_name: &str) -> bool {
        self.name == class_name
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.is_or_inherits(class_name))
    }
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish()
    }
}

struct StateDecl {
    symbol: String,
    options: StateOptions,
    body: Option<StateBodyFn>,
    initial: bool,
}

/// Builder for an [`EntityClass`]. Declarations are validated at
/// [`build`](EntityClassBuilder::build): a duplicate state symbol or a
/// second initial state fails class setup.
pub struct EntityClassBuilder {
    name: String,
    parent: Option<Arc<EntityClass>>,
    ops: Vec<(String, OpFn)>,
    states: Vec<StateDecl>,
    bindings: Vec<HandlerBinding>,
}

impl EntityClassBuilder {
    pub fn parent(mut self, parent: Arc<EntityClass>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Declares a state-sensitive operation. Calls are intercepted and
    /// no-op while the entity's current state ignores the name.
    pub fn operation<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Entity, &Value) -> Result<Value, EntityError> + Send + Sync + 'static,
    {
        self.ops.push((name.into(), Arc::new(body)));
        self
    }

    /// Declares a state with no entry body.
    pub fn state(self, symbol: impl Into<String>, options: StateOptions) -> Self {
        self.push_state(symbol.into(), options, None, false)
    }

    /// Declares a state whose body runs (resumably) when the state is
    /// entered.
    pub fn state_with<F, Fut>(
        self,
        symbol: impl Into<String>,
        options: StateOptions,
        body: F,
    ) -> Self
    where
        F: Fn(Entity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.push_state(symbol.into(), options, Some(wrap_state_body(body)), false)
    }

    /// Declares a state and marks it as the class's initial state.
    pub fn initial_state(self, symbol: impl Into<String>, options: StateOptions) -> Self {
        self.push_state(symbol.into(), options, None, true)
    }

    /// Initial state with an entry body.
    pub fn initial_state_with<F, Fut>(
        self,
        symbol: impl Into<String>,
        options: StateOptions,
        body: F,
    ) -> Self
    where
        F: Fn(Entity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.push_state(symbol.into(), options, Some(wrap_state_body(body)), true)
    }

    /// Declares a handler for the named action. Every instance of the
    /// class installs it with the external action system at construction.
    pub fn on_event<F, Fut>(
        mut self,
        action: impl Into<String>,
        options: HandlerOptions,
        handler: F,
    ) -> Self
    where
        F: Fn(Entity, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        let handler: HandlerFn = Arc::new(move |entity, event| Box::pin(handler(entity, event)));
        self.bindings.push(HandlerBinding {
            action: action.into(),
            handler,
            options,
        });
        self
    }

    pub fn build(self) -> Result<Arc<EntityClass>, EntityError> {
        let mut states = StateTable::new();
        for decl in self.states {
            let state = State::new(
                decl.symbol.clone(),
                self.name.clone(),
                decl.options,
                decl.body,
            );
            states.insert(state)?;
            if decl.initial {
                states.set_initial(&decl.symbol, &self.name)?;
            }
        }

        let mut ops = HashMap::new();
        for (name, op) in self.ops {
            ops.insert(name, op);
        }

        let mut bindings = HashMap::new();
        for binding in self.bindings {
            bindings.insert(binding.action.clone(), binding);
        }

        Ok(Arc::new(EntityClass {
            name: self.name,
            parent: self.parent,
            states,
            ops,
            bindings,
        }))
    }

    fn push_state(
        mut self,
        symbol: String,
        options: StateOptions,
        body: Option<StateBodyFn>,
        initial: bool,
    ) -> Self {
        self.states.push(StateDecl {
            symbol,
            options,
            body,
            initial,
        });
        self
    }
}

fn wrap_state_body<F, Fut>(body: F) -> StateBodyFn
where
    F: Fn(Entity) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Arc::new(move |entity| {
        let fut = body(entity);
        Box::pin(async move {
            fut.await;
            HandlerResult::Continue
        })
    })
}
