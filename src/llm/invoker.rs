//! Generation invoker: gate check, timed run, and outcome mapping.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::llm::{RawCompletion, TextGenerator};
use crate::resources::ResourceGate;

/// Result of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Usable text, complete or salvaged from a timeout.
    Success(String),
    /// Generation was not attempted: artifacts missing or host constrained.
    ResourceUnavailable,
    /// Generation ran and misbehaved.
    HardFailure { reason: String },
}

impl GenerationOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::HardFailure { .. } => "hard_failure",
        }
    }
}

impl RawCompletion {
    /// Map process output to an outcome, salvaging partial output on timeout.
    pub fn into_outcome(self) -> GenerationOutcome {
        if self.timed_out {
            let partial = self.partial_stdout.trim();
            return if partial.is_empty() {
                GenerationOutcome::HardFailure {
                    reason: "generation timed out with no output".into(),
                }
            } else {
                GenerationOutcome::Success(partial.to_string())
            };
        }

        let out = self.stdout.trim();
        if out.is_empty() {
            GenerationOutcome::HardFailure {
                reason: "generation produced empty output".into(),
            }
        } else {
            GenerationOutcome::Success(out.to_string())
        }
    }
}

/// Runs the generator behind the resource gate.
pub struct GenerationInvoker {
    generator: Arc<dyn TextGenerator>,
    gate: ResourceGate,
}

impl GenerationInvoker {
    pub fn new(generator: Arc<dyn TextGenerator>, gate: ResourceGate) -> Self {
        Self { generator, gate }
    }

    /// Attempt one generation. Every failure path resolves to an outcome.
    pub async fn generate(
        &self,
        prompt: &str,
        token_budget: u32,
        timeout: Duration,
    ) -> GenerationOutcome {
        if !self.generator.is_available() {
            debug!(generator = self.generator.name(), "Generator artifacts missing");
            return GenerationOutcome::ResourceUnavailable;
        }
        if self.gate.is_constrained() {
            info!("Host resources too low for generation, using fallback");
            return GenerationOutcome::ResourceUnavailable;
        }

        match self.generator.generate(prompt, token_budget, timeout).await {
            Ok(raw) => {
                let outcome = raw.into_outcome();
                debug!(outcome = outcome.label(), "Generation finished");
                outcome
            }
            Err(e) => {
                warn!(generator = self.generator.name(), error = %e, "Generation failed");
                GenerationOutcome::HardFailure {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::GateConfig;
    use crate::error::LlmError;
    use crate::resources::{MemoryProbe, MemorySnapshot};

    struct StubGenerator {
        available: bool,
        result: fn() -> Result<RawCompletion, LlmError>,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn new(result: fn() -> Result<RawCompletion, LlmError>) -> Self {
            Self {
                available: true,
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }
        fn is_available(&self) -> bool {
            self.available
        }
        async fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<RawCompletion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    struct Probe(Option<MemorySnapshot>);

    impl MemoryProbe for Probe {
        fn snapshot(&self) -> Option<MemorySnapshot> {
            self.0
        }
    }

    fn roomy_gate() -> ResourceGate {
        ResourceGate::with_probe(
            GateConfig::default(),
            Box::new(Probe(Some(MemorySnapshot {
                total_kb: 4_000_000,
                available_kb: 2_000_000,
            }))),
        )
    }

    fn tight_gate() -> ResourceGate {
        ResourceGate::with_probe(GateConfig::default(), Box::new(Probe(None)))
    }

    async fn run(generator: Arc<StubGenerator>, gate: ResourceGate) -> GenerationOutcome {
        GenerationInvoker::new(generator, gate)
            .generate("prompt", 200, Duration::from_secs(65))
            .await
    }

    #[tokio::test]
    async fn success_is_trimmed() {
        let generator = Arc::new(StubGenerator::new(|| {
            Ok(RawCompletion::completed("  Keep studying.\n"))
        }));
        let outcome = run(generator, roomy_gate()).await;
        assert_eq!(outcome, GenerationOutcome::Success("Keep studying.".into()));
    }

    #[tokio::test]
    async fn timeout_with_partial_output_is_salvaged() {
        let generator = Arc::new(StubGenerator::new(|| {
            Ok(RawCompletion::timed_out("Partial answer about running."))
        }));
        let outcome = run(generator, roomy_gate()).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Success("Partial answer about running.".into())
        );
    }

    #[tokio::test]
    async fn timeout_without_output_is_hard_failure() {
        let generator = Arc::new(StubGenerator::new(|| Ok(RawCompletion::timed_out("  \n"))));
        let outcome = run(generator, roomy_gate()).await;
        assert!(matches!(outcome, GenerationOutcome::HardFailure { .. }));
    }

    #[tokio::test]
    async fn empty_output_is_hard_failure() {
        let generator = Arc::new(StubGenerator::new(|| Ok(RawCompletion::completed(""))));
        let outcome = run(generator, roomy_gate()).await;
        assert!(matches!(outcome, GenerationOutcome::HardFailure { .. }));
    }

    #[tokio::test]
    async fn invocation_error_is_hard_failure() {
        let generator = Arc::new(StubGenerator::new(|| {
            Err(LlmError::SpawnFailed {
                binary: "llama".into(),
                reason: "permission denied".into(),
            })
        }));
        let outcome = run(generator, roomy_gate()).await;
        match outcome {
            GenerationOutcome::HardFailure { reason } => assert!(reason.contains("permission denied")),
            other => panic!("expected HardFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn constrained_host_skips_invocation() {
        let generator = Arc::new(StubGenerator::new(|| Ok(RawCompletion::completed("x"))));
        let outcome = run(Arc::clone(&generator), tight_gate()).await;
        assert_eq!(outcome, GenerationOutcome::ResourceUnavailable);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_artifacts_skip_invocation() {
        let mut stub = StubGenerator::new(|| Ok(RawCompletion::completed("x")));
        stub.available = false;
        let generator = Arc::new(stub);
        let outcome = run(Arc::clone(&generator), roomy_gate()).await;
        assert_eq!(outcome, GenerationOutcome::ResourceUnavailable);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
