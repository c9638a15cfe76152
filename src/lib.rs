//! Game entity runtime: per-entity event queues drained by dedicated
//! threads, an elastic pool of resumable workers so handlers can suspend
//! mid-body, named states that suppress operations at the dispatch layer,
//! and a registration protocol binding class-declared handlers to a host
//! engine's action system.

pub mod config; // Centralized configuration constants
pub mod context; // Engine environment: action system + class registry
pub mod entity; // Entity handle, classes, states
pub mod error;
pub mod events; // Queue messages, handler protocol
pub mod runtime; // Drain thread, worker pool, finishables

pub use context::{ActionCallback, ActionRouter, ActionSystem, EngineContext, HandlerHandle};
pub use entity::class::{EntityClass, EntityClassBuilder};
pub use entity::state::{State, StateOptions};
pub use entity::{Entity, StateTarget};
pub use error::EntityError;
pub use events::handler::{HandlerOptions, HandlerResult};
pub use events::types::{ActionInfo, Event};
pub use runtime::finishable::{Finish, Finishable};
pub use runtime::worker::{wait_delay, wait_for};
