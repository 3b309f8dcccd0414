//! Generation prompt and outbound message text.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::pipeline::flood::FloodState;
use crate::pipeline::settings::RuntimeConfig;
use crate::pipeline::types::Request;
use crate::workspace::Memory;

/// Rules listed at the end of every prompt. Echoes of these are filtered
/// from generated text.
pub const PROMPT_RULES: &[&str] = &[
    "Output ONLY the final answer in 1-3 sentences.",
    "If you learn a new stable fact, write: NEW_FACT:<text>",
    "To read a page from an allowed site, write SITE_REQUEST: <domain> on its own line.",
    "Do not include headings or formatting.",
];

/// Build the generation prompt, ending with the answer marker line.
pub fn build_prompt(
    memory: &Memory,
    request: &Request,
    config: &RuntimeConfig,
    answer_marker: &str,
) -> String {
    let mut prompt = String::from(
        "You are a tiny offline AI running on a Raspberry Pi 3.\n\
         Use the memory below to choose the best decision.\n\n",
    );

    section(&mut prompt, "FACTS", &memory.facts);
    section(&mut prompt, "GOALS", &memory.goals);
    section(&mut prompt, "SCRATCHPAD", &memory.scratchpad);
    section(&mut prompt, "QUESTION", request.effective_question());
    if let Some(context) = request.extra_context.as_deref()
        && !context.trim().is_empty()
    {
        section(&mut prompt, "CONTEXT", context);
    }
    let sites = if config.allowed_sites.is_empty() {
        "(none)".to_string()
    } else {
        config.allowed_sites.join("\n")
    };
    section(&mut prompt, "ALLOWED SITES", &sites);

    prompt.push_str("RULES:\n");
    for rule in PROMPT_RULES {
        prompt.push_str("- ");
        prompt.push_str(rule);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(answer_marker);
    prompt.push('\n');
    prompt
}

fn section(prompt: &mut String, label: &str, body: &str) {
    prompt.push_str(label);
    prompt.push_str(":\n");
    prompt.push_str(body.trim());
    prompt.push_str("\n\n");
}

/// Subject line of a reply.
pub fn reply_subject(request: &Request) -> String {
    format!("dt-out RQ:{}", request.id)
}

/// Body of a reply.
pub fn reply_body(request: &Request, answer: &str) -> String {
    format!(
        "DT-OUT for Request-ID {}\n\nQuestion:\n{}\n\nAnswer:\n{}\n",
        request.id,
        request.effective_question(),
        answer.trim()
    )
}

/// Subject line of the hourly digest.
pub fn digest_subject(bucket: &str) -> String {
    format!("statusinfo {bucket}")
}

/// Body of the hourly digest.
pub fn digest_body(bucket: &str, state: &FloodState) -> String {
    let last_sent = state
        .last_sent_ts
        .map(|ts: DateTime<Utc>| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "never".into());
    let last_error = state.last_error.as_deref().unwrap_or("none recorded");
    format!(
        "dt-core status for hour {bucket}\n\n\
         Total emails sent (lifetime): {}\n\
         Last sent timestamp (UTC): {last_sent}\n\
         Last error: {last_error}\n",
        state.total_sent
    )
}
