//! Shared types for the decision-and-dispatch pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Question text used when a request arrives with an empty body.
pub const DEFAULT_QUESTION: &str = "(no question body found)";

// ── Inbound request ─────────────────────────────────────────────────

/// A normalized inbound question.
///
/// The transport builds these; the processor consumes each exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Sortable id with a `YYYY-MM-DD-HHMMSS` timestamp prefix.
    pub id: String,
    /// The question as the requester wrote it.
    pub question: String,
    /// Transport handle for the originating message.
    pub origin_id: String,
    /// Optional free-form context supplied with the question.
    pub extra_context: Option<String>,
}

impl Request {
    pub fn new(id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            origin_id: "LOCAL".into(),
            extra_context: None,
        }
    }

    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = origin_id.into();
        self
    }

    pub fn with_extra_context(mut self, context: impl Into<String>) -> Self {
        self.extra_context = Some(context.into());
        self
    }

    /// Trimmed question, or [`DEFAULT_QUESTION`] when blank.
    pub fn effective_question(&self) -> &str {
        let q = self.question.trim();
        if q.is_empty() { DEFAULT_QUESTION } else { q }
    }
}

/// Id for a locally created request: the current UTC time as `YYYY-MM-DD-HHMMSS`.
pub fn local_request_id(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H%M%S").to_string()
}

// ── Directives ──────────────────────────────────────────────────────

/// A control instruction found inside generated text.
///
/// Never shown to the requester; each one triggers a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Directive {
    /// A stable fact worth remembering.
    LearnedFact(String),
    /// A domain the generator wants fetched.
    FetchRequest(String),
}

// ── Reply ───────────────────────────────────────────────────────────

/// Which path produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// A `CONFIG:` command response.
    Config,
    /// Local generation (complete or salvaged).
    Generated,
    /// The deterministic fallback table.
    Fallback,
    /// Decision logic failed; the safe default was used.
    SafeDefault,
}

impl AnswerSource {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Generated => "generated",
            Self::Fallback => "fallback",
            Self::SafeDefault => "safe_default",
        }
    }
}

/// The answer decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

// ── Collaborators ───────────────────────────────────────────────────

/// Mailbox transport: pure I/O, no decision logic.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Transport name (e.g. "email").
    fn name(&self) -> &str;

    /// Fetch and claim all new requests.
    async fn fetch_requests(&self) -> Result<Vec<Request>, ChannelError>;

    /// Send one message. `origin_id` is `None` for status digests.
    async fn send(
        &self,
        origin_id: Option<&str>,
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn blank_question_uses_default() {
        let req = Request::new("2025-11-18-091550", "   \n ");
        assert_eq!(req.effective_question(), DEFAULT_QUESTION);
    }

    #[test]
    fn question_is_trimmed() {
        let req = Request::new("2025-11-18-091550", "\n What now? \n");
        assert_eq!(req.effective_question(), "What now?");
    }

    #[test]
    fn builder_sets_origin_and_context() {
        let req = Request::new("id", "q")
            .with_origin("42")
            .with_extra_context("Sent from phone");
        assert_eq!(req.origin_id, "42");
        assert_eq!(req.extra_context.as_deref(), Some("Sent from phone"));
    }

    #[test]
    fn local_request_id_format() {
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 9, 15, 50).unwrap();
        assert_eq!(local_request_id(now), "2025-11-18-091550");
    }

    #[test]
    fn directive_serialization() {
        let json = serde_json::to_value(Directive::FetchRequest("ssa.gov".into())).unwrap();
        assert_eq!(json["kind"], "fetch_request");
        assert_eq!(json["value"], "ssa.gov");
    }

    #[test]
    fn answer_source_labels() {
        assert_eq!(AnswerSource::Config.label(), "config");
        assert_eq!(AnswerSource::Generated.label(), "generated");
        assert_eq!(AnswerSource::Fallback.label(), "fallback");
        assert_eq!(AnswerSource::SafeDefault.label(), "safe_default");
    }
}
