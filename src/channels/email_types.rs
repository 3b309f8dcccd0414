//! Request mail format: subject matching and body parsing.
//!
//! A request mail looks like:
//!
//! ```text
//! Subject: dt-in RQ:2025-11-16-175120
//!
//! Request-ID: 2025-11-16-175120
//!
//! Question:
//! Should I apply to the VA this week?
//!
//! Extra context (optional):
//! - Sent from the Android app.
//! ```

use crate::pipeline::types::{DEFAULT_QUESTION, Request};

/// Subject prefix of request mails.
pub const DEFAULT_REQUEST_PREFIX: &str = "dt-in";

/// Whether `subject` marks a request: `<prefix> RQ:` ignoring case and spaces.
pub fn is_request_subject(subject: &str, prefix: &str) -> bool {
    let squashed = |s: &str| s.to_lowercase().replace(' ', "");
    squashed(subject).starts_with(&format!("{}rq:", squashed(prefix)))
}

/// Request id after `RQ:` in the subject, or empty.
pub fn subject_request_id(subject: &str) -> String {
    subject
        .to_ascii_lowercase()
        .find("rq:")
        .map(|i| subject[i + 3..].trim().to_string())
        .unwrap_or_default()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Question,
    Extra,
}

/// Parse a request body. A `Request-ID:` line overrides `fallback_id`.
pub fn parse_request_body(body: &str, fallback_id: &str, origin_id: &str) -> Request {
    let mut request_id = fallback_id.to_string();
    let mut question: Vec<&str> = Vec::new();
    let mut extra: Vec<&str> = Vec::new();
    let mut section = Section::Preamble;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(id) = line.strip_prefix("Request-ID:") {
            let id = id.trim();
            if !id.is_empty() {
                request_id = id.to_string();
            }
        } else if line.trim().eq_ignore_ascii_case("question:") {
            section = Section::Question;
        } else if line.to_lowercase().starts_with("extra context") {
            section = Section::Extra;
        } else {
            match section {
                Section::Question => question.push(line),
                Section::Extra => extra.push(line),
                Section::Preamble => {}
            }
        }
    }

    let question = question.join("\n").trim().to_string();
    let extra = extra.join("\n").trim().to_string();

    let mut request = Request::new(
        request_id,
        if question.is_empty() {
            DEFAULT_QUESTION.to_string()
        } else {
            question
        },
    )
    .with_origin(origin_id);
    if !extra.is_empty() {
        request = request.with_extra_context(extra);
    }
    request
}
