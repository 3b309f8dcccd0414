//! Request processor: turns each inbound request into at most one reply.
//!
//! Per request:
//! 1. `CONFIG:` commands → config response, nothing else runs
//! 2. Gated local generation
//! 3. Fallback table when generation is unavailable or failed
//! 4. Directive extraction on generated text (facts, site fetches)
//! 5. Flood-gated send
//!
//! Per cycle, after all requests: the hourly digest check, then one write of
//! the flood state. A bad request never aborts the batch; only a failed
//! mailbox fetch or a failed state write fails the cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_ANSWER_MARKER;
use crate::error::PipelineError;
use crate::llm::{GenerationInvoker, GenerationOutcome};
use crate::pipeline::directives::{DirectiveExtractor, SAFE_DEFAULT_ANSWER, append_web_results};
use crate::pipeline::fallback::FallbackEngine;
use crate::pipeline::flood::FloodState;
use crate::pipeline::prompt::{build_prompt, digest_body, digest_subject, reply_body, reply_subject};
use crate::pipeline::settings::{RuntimeConfig, handle_config_command};
use crate::pipeline::types::{Answer, AnswerSource, Clock, Request, RequestTransport, SystemClock};
use crate::store::StateStore;
use crate::web::SiteFetcher;
use crate::workspace::{LessonRecorder, Workspace};

/// Default minimum gap between replies.
const DEFAULT_MIN_SEND_INTERVAL: Duration = Duration::from_secs(10);

/// The answer for one request plus the collaborator failures met on the way.
#[derive(Debug, Clone)]
pub struct Decision {
    pub answer: Answer,
    /// Recorded as the last error; never shown to the requester.
    pub errors: Vec<String>,
}

impl Decision {
    fn new(text: impl Into<String>, source: AnswerSource) -> Self {
        Self {
            answer: Answer {
                text: text.into(),
                source,
            },
            errors: Vec::new(),
        }
    }
}

/// What one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub sent: usize,
    /// Replies held back by flood control.
    pub withheld: usize,
    /// Replies the transport failed to send.
    pub failed: usize,
    pub digest_sent: bool,
}

/// Decision-and-dispatch pipeline.
pub struct RequestProcessor {
    invoker: GenerationInvoker,
    fallback: FallbackEngine,
    extractor: DirectiveExtractor,
    workspace: Arc<Workspace>,
    lessons: Arc<dyn LessonRecorder>,
    fetcher: Arc<dyn SiteFetcher>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    min_send_interval: Duration,
    answer_marker: String,
}

impl RequestProcessor {
    pub fn new(
        invoker: GenerationInvoker,
        workspace: Arc<Workspace>,
        lessons: Arc<dyn LessonRecorder>,
        fetcher: Arc<dyn SiteFetcher>,
        store: StateStore,
    ) -> Self {
        Self {
            invoker,
            fallback: FallbackEngine::default_rules(),
            extractor: DirectiveExtractor::new(DEFAULT_ANSWER_MARKER),
            workspace,
            lessons,
            fetcher,
            store,
            clock: Arc::new(SystemClock),
            min_send_interval: DEFAULT_MIN_SEND_INTERVAL,
            answer_marker: DEFAULT_ANSWER_MARKER.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_min_send_interval(mut self, interval: Duration) -> Self {
        self.min_send_interval = interval;
        self
    }

    /// Use `marker` both to end the prompt and to cut echoed prompt text.
    pub fn with_answer_marker(mut self, marker: impl Into<String>) -> Self {
        self.answer_marker = marker.into();
        self.extractor = DirectiveExtractor::new(&self.answer_marker);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Decide the answer for one request.
    ///
    /// Fails only when a config change cannot be persisted.
    pub async fn decide(&self, request: &Request) -> Result<Decision, PipelineError> {
        let question = request.effective_question();
        let config = self.store.load_runtime_config();

        if let Some(reply) = handle_config_command(question, &config) {
            if reply.changed(&config) {
                self.store.save_runtime_config(&reply.config)?;
            }
            info!(id = %request.id, "Answered config command");
            return Ok(Decision::new(reply.response, AnswerSource::Config));
        }

        let memory = self.workspace.load_memory().await;
        let prompt = build_prompt(&memory, request, &config, &self.answer_marker);

        let outcome = self
            .invoker
            .generate(&prompt, config.llama_tokens, config.timeout())
            .await;
        debug!(id = %request.id, outcome = outcome.label(), "Generation outcome");

        match outcome {
            GenerationOutcome::Success(text) => Ok(self.finish_generated(request, &config, &text).await),
            GenerationOutcome::ResourceUnavailable => {
                let text = self.fallback.answer(question, &memory.decision_context());
                Ok(Decision::new(text, AnswerSource::Fallback))
            }
            GenerationOutcome::HardFailure { reason } => {
                warn!(id = %request.id, reason = %reason, "Generation failed, using fallback");
                let text = self.fallback.answer(question, &memory.decision_context());
                let mut decision = Decision::new(text, AnswerSource::Fallback);
                decision
                    .errors
                    .push(format!("Generation failed for {}: {reason}", request.id));
                Ok(decision)
            }
        }
    }

    /// Extract directives from generated text and carry them out.
    async fn finish_generated(&self, request: &Request, config: &RuntimeConfig, raw: &str) -> Decision {
        let extraction = self.extractor.extract(raw);
        let mut errors = Vec::new();

        for fact in extraction.learned_facts() {
            if let Err(e) = self.lessons.record_lesson(fact).await {
                warn!(id = %request.id, error = %e, "Failed to record learned fact");
                errors.push(format!("Lesson recording failed for {}: {e}", request.id));
            }
        }

        let mut visible = extraction.visible.clone();
        let requested: Vec<String> = extraction
            .fetch_requests()
            .into_iter()
            .filter(|domain| config.is_site_allowed(domain))
            .collect();
        if !requested.is_empty() {
            info!(id = %request.id, sites = ?requested, "Fetching requested sites");
            let summary = self
                .fetcher
                .fetch_sites(&config.allowed_sites, &requested, request.effective_question())
                .await;
            if summary.lines().any(|line| line.starts_with("[ERROR]")) {
                errors.push(format!("Site fetch reported errors for {}", request.id));
            }
            visible = append_web_results(&visible, &summary);
        }

        Decision {
            answer: Answer {
                text: visible,
                source: AnswerSource::Generated,
            },
            errors,
        }
    }

    /// Answer one request outside the polling loop. Never fails: a decision
    /// failure yields the safe default sentence.
    pub async fn answer(&self, request: &Request) -> Answer {
        match self.decide(request).await {
            Ok(decision) => {
                for e in &decision.errors {
                    warn!(id = %request.id, error = %e, "Collaborator failure");
                }
                decision.answer
            }
            Err(e) => {
                error!(id = %request.id, error = %e, "Decision failed, using safe default");
                safe_default()
            }
        }
    }

    /// Run one polling cycle against `transport`.
    pub async fn run_cycle(&self, transport: &dyn RequestTransport) -> Result<CycleReport, PipelineError> {
        let mut state = self.store.load_flood_state();

        let requests = match transport.fetch_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                error!(transport = transport.name(), error = %e, "Fetching requests failed");
                state.record_error(format!("Fetch failed: {e}"));
                if let Err(save_err) = self.store.save_flood_state(&state) {
                    error!(error = %save_err, "Failed to persist state after fetch failure");
                }
                return Err(PipelineError::ChannelFetch(e));
            }
        };

        let mut report = CycleReport {
            received: requests.len(),
            ..CycleReport::default()
        };
        if !requests.is_empty() {
            info!(count = requests.len(), "Processing requests");
        }

        for request in &requests {
            self.process_request(transport, request, &mut state, &mut report).await;
        }

        let now = self.clock.now();
        if state.should_send_digest(now)
            && let Some(bucket) = state.current_hour_bucket()
        {
            let body = digest_body(&bucket, &state);
            match transport.send(None, &digest_subject(&bucket), &body).await {
                Ok(()) => {
                    info!(bucket = %bucket, "Status digest sent");
                    state.record_digest_sent(bucket);
                    report.digest_sent = true;
                }
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Status digest failed");
                    state.record_error(format!("Status digest failed: {e}"));
                }
            }
        }

        self.store.save_flood_state(&state)?;

        debug!(?report, "Cycle complete");
        Ok(report)
    }

    async fn process_request(
        &self,
        transport: &dyn RequestTransport,
        request: &Request,
        state: &mut FloodState,
        report: &mut CycleReport,
    ) {
        info!(id = %request.id, origin = %request.origin_id, "Processing request");
        state.record_received(request);

        let answer = match self.decide(request).await {
            Ok(decision) => {
                for e in decision.errors {
                    state.record_error(e);
                }
                decision.answer
            }
            Err(e) => {
                error!(id = %request.id, error = %e, "Decision failed, using safe default");
                state.record_error(format!("Decision failed for {}: {e}", request.id));
                safe_default()
            }
        };

        let now = self.clock.now();
        if !state.can_send_now(now, self.min_send_interval) {
            warn!(id = %request.id, "Flood protection: withholding reply");
            state.record_error(format!("Flood protection: skipping reply for {}", request.id));
            report.withheld += 1;
            return;
        }

        let subject = reply_subject(request);
        let body = reply_body(request, &answer.text);
        match transport.send(Some(&request.origin_id), &subject, &body).await {
            Ok(()) => {
                state.record_sent(now);
                report.sent += 1;
                info!(id = %request.id, source = answer.source.label(), "Reply sent");
            }
            Err(e) => {
                error!(id = %request.id, error = %e, "Reply send failed");
                state.record_error(format!("Send failed for {}: {e}", request.id));
                report.failed += 1;
            }
        }
    }
}

fn safe_default() -> Answer {
    Answer {
        text: SAFE_DEFAULT_ANSWER.to_string(),
        source: AnswerSource::SafeDefault,
    }
}
