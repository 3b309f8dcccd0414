//! Local text generation.
//!
//! The generator itself is an external, non-cooperative process. This module
//! wraps it behind [`TextGenerator`] and turns every invocation into exactly
//! one [`GenerationOutcome`] via [`GenerationInvoker`].

pub mod invoker;
pub mod llama;

pub use invoker::{GenerationInvoker, GenerationOutcome};
pub use llama::LlamaCli;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;

/// What the generator process left behind.
///
/// `partial_stdout` is only meaningful when `timed_out` is set: it holds the
/// output captured before the deadline fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCompletion {
    pub stdout: String,
    pub timed_out: bool,
    pub partial_stdout: String,
}

impl RawCompletion {
    /// A run that finished on its own.
    pub fn completed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A run that hit the deadline after producing `partial`.
    pub fn timed_out(partial: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            timed_out: true,
            partial_stdout: partial.into(),
        }
    }
}

/// A local text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether the binary and its model artifact are present.
    fn is_available(&self) -> bool;

    /// Run one generation with a hard wall-clock timeout.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<RawCompletion, LlmError>;
}
