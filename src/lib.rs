//! dt-core: answers mailed questions with a gated local model and a
//! deterministic fallback.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod resources;
pub mod store;
pub mod web;
pub mod workspace;
