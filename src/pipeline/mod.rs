//! Decision-and-dispatch pipeline.
//!
//! Every request from the transport flows through:
//! 1. `settings::handle_config_command()`: in-band `CONFIG:` commands
//! 2. `GenerationInvoker::generate()`: gated local generation
//! 3. `FallbackEngine::answer()`: keyword table when generation is out
//! 4. `DirectiveExtractor::extract()`: facts and site requests in generated text
//! 5. `FloodState`: reply spacing and the hourly digest
//!
//! `RequestProcessor` drives the whole cycle.

pub mod directives;
pub mod fallback;
pub mod flood;
pub mod processor;
pub mod prompt;
pub mod settings;
pub mod types;

pub use processor::{CycleReport, RequestProcessor};
