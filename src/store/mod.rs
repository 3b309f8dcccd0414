//! Persistence layer: JSON documents in the state directory.

pub mod json;
pub mod state;

pub use json::JsonStore;
pub use state::StateStore;
