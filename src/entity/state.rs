// Named entity states and the per-class state table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::EntityError;
use crate::events::handler::StateBodyFn;

/// Declaration options for a state.
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    ignores: Vec<String>,
}

impl StateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation suppressed while the state is active.
    pub fn ignore(mut self, operation: impl Into<String>) -> Self {
        self.ignores.push(operation.into());
        self
    }

    /// Several suppressed operations at once.
    pub fn ignores<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignores.extend(operations.into_iter().map(Into::into));
        self
    }

    pub(crate) fn into_ignore_set(self) -> HashSet<String> {
        self.ignores.into_iter().collect()
    }
}

/// A named mode an entity can occupy. Immutable after declaration; each
/// entity is in at most one state at a time. While active, every operation
/// in the ignore-set becomes a no-op at the dispatch layer.
pub struct State {
    symbol: String,
    class_name: String,
    ignores: HashSet<String>,
    body: Option<StateBodyFn>,
}

impl State {
    pub(crate) fn new(
        symbol: String,
        class_name: String,
        options: StateOptions,
        body: Option<StateBodyFn>,
    ) -> Self {
        Self {
            symbol,
            class_name,
            ignores: options.into_ignore_set(),
            body,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Name of the class this state was declared on.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// True if invocations of `operation` are suppressed while this state
    /// is current.
    pub fn ignores_operation(&self, operation: &str) -> bool {
        self.ignores.contains(operation)
    }

    pub(crate) fn body(&self) -> Option<&StateBodyFn> {
        self.body.as_ref()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("symbol", &self.symbol)
            .field("class", &self.class_name)
            .field("ignores", &self.ignores)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Per-class mapping of symbol to state, plus the designated initial state.
/// Read-only after class setup.
pub(crate) struct StateTable {
    states: HashMap<String, Arc<State>>,
    initial: Option<String>,
}

impl StateTable {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            initial: None,
        }
    }

    pub fn insert(&mut self, state: State) -> Result<Arc<State>, EntityError> {
        if self.states.contains_key(state.symbol()) {
            return Err(EntityError::DuplicateState {
                symbol: state.symbol().to_string(),
                class: state.class_name().to_string(),
            });
        }
        let state = Arc::new(state);
        self.states
            .insert(state.symbol().to_string(), Arc::clone(&state));
        Ok(state)
    }

    pub fn set_initial(&mut self, symbol: &str, class: &str) -> Result<(), EntityError> {
        if let Some(existing) = &self.initial {
            return Err(EntityError::DuplicateInitial {
                symbol: symbol.to_string(),
                existing: existing.clone(),
                class: class.to_string(),
            });
        }
        self.initial = Some(symbol.to_string());
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<&Arc<State>> {
        self.states.get(symbol)
    }

    pub fn initial(&self) -> Option<&Arc<State>> {
        self.initial.as_deref().and_then(|s| self.states.get(s))
    }
}
