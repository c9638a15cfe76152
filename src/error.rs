use thiserror::Error;

/// Errors raised by entity class setup, state changes, and operation
/// dispatch. Scheduler invariant violations are not represented here; those
/// indicate runtime bugs and panic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// An operation was invoked that no class in the entity's hierarchy
    /// defines.
    #[error("undefined operation `{operation}` for entity class `{class}`")]
    UnknownOperation { operation: String, class: String },

    /// `goto_state` was given a symbol that resolves to no state on the
    /// entity's class or any ancestor.
    #[error("no state named `{symbol}` found on `{class}` or its ancestors")]
    UnknownState { symbol: String, class: String },

    /// `goto_state` was given a state value belonging to an unrelated
    /// class.
    #[error("state `{symbol}` belongs to `{owner}`, not `{class}` or its ancestors")]
    ForeignState {
        symbol: String,
        owner: String,
        class: String,
    },

    /// A state symbol was declared twice on the same class.
    #[error("a state named `{symbol}` has already been defined on `{class}`")]
    DuplicateState { symbol: String, class: String },

    /// A second initial state was declared on one class.
    #[error("cannot declare initial state `{symbol}` on `{class}`: `{existing}` is already initial")]
    DuplicateInitial {
        symbol: String,
        existing: String,
        class: String,
    },
}
