/// Centralized configuration constants for the entity runtime.
///
/// This module is the single source of truth for reserved event names and
/// thread naming, so host-engine code and runtime internals stay in sync.

/// Reserved event names.
pub mod events {
    /// Action dispatched once per frame by the host engine to ticking
    /// entities. Gated by `Entity::set_ticking`, never unregistered.
    pub const TICK_ACTION: &str = "tick";

    /// Prefix for internally queued state-entry events. An entity entering
    /// state `:walk` queues `state:walk`; the body runs only if that state
    /// is still current when the event is drained.
    pub const STATE_EVENT_PREFIX: &str = "state:";
}

/// Thread naming.
pub mod threads {
    /// Prefix for per-entity drain threads. The entity class name is
    /// appended, e.g. `entity-guard`.
    pub const ENTITY_THREAD_PREFIX: &str = "entity";
}
