pub mod entity_runtime;
pub mod finishable;
pub mod pool;
pub mod worker;
