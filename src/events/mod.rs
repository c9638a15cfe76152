pub mod handler;
pub(crate) mod registry;
pub mod types;
