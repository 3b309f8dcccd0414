//! Directive extraction: splits generated text into what the requester sees
//! and the control directives hidden inside it.
//!
//! Passes, in order:
//! 1. Cut everything up to and including the last answer-marker line start
//!    (the generator tends to echo its prompt).
//! 2. Drop empty lines and echoed prompt lines; if nothing survives, keep the
//!    unfiltered text instead.
//! 3. Split every `NEW_FACT:` occurrence off into a `LearnedFact`, site
//!    request lines included. A remainder that is itself an echo is dropped.
//! 4. Collect `SITE_REQUEST:` lines as `FetchRequest`s and hide them.
//! 5. Keep at most three paragraphs.
//! 6. Substitute a safe default sentence if nothing is left.
//!
//! Parsing is pure. Acting on the directives is the processor's job.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::DEFAULT_ANSWER_MARKER;
use crate::pipeline::prompt::PROMPT_RULES;
use crate::pipeline::types::Directive;
use crate::web::normalize_domain;

/// In-line keyword that introduces a learned fact.
pub const FACT_KEYWORD: &str = "NEW_FACT:";

/// Line label that requests a page fetch.
pub const SITE_REQUEST_LABEL: &str = "SITE_REQUEST:";

/// Answer used whenever nothing else is left to say.
pub const SAFE_DEFAULT_ANSWER: &str =
    "Choose the option that is safest, most stable, and moves you closer to your long-term goals.";

/// Paragraphs kept in a reply.
pub const MAX_PARAGRAPHS: usize = 3;

/// Heading placed above fetched site summaries.
pub const WEB_RESULTS_HEADING: &str = "--- Web results ---";

/// Prompt section labels the generator likes to repeat.
const SECTION_LABELS: &[&str] = &[
    "facts:",
    "goals:",
    "scratchpad:",
    "question:",
    "context:",
    "allowed sites:",
    "rules:",
    "answer:",
];

/// Literal end-of-sequence markers.
const CONTROL_TOKENS: &[&str] = &["</s>", "<s>", "[end of text]"];

/// Chat-template tokens such as `<|assistant|>` or `<|im_end|>`.
static CHAT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\|[a-z_]+\|>$").expect("chat token pattern"));

/// A blank line, possibly holding whitespace.
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break pattern"));

/// Visible text plus the directives removed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub visible: String,
    pub directives: Vec<Directive>,
}

impl Extraction {
    /// Learned facts, in text order.
    pub fn learned_facts(&self) -> impl Iterator<Item = &str> {
        self.directives.iter().filter_map(|d| match d {
            Directive::LearnedFact(fact) => Some(fact.as_str()),
            Directive::FetchRequest(_) => None,
        })
    }

    /// Requested domains, de-duplicated, in text order.
    pub fn fetch_requests(&self) -> Vec<String> {
        self.directives
            .iter()
            .filter_map(|d| match d {
                Directive::FetchRequest(domain) => Some(domain.clone()),
                Directive::LearnedFact(_) => None,
            })
            .collect()
    }
}

/// Two-pass parser for generated text.
#[derive(Debug, Clone)]
pub struct DirectiveExtractor {
    answer_marker: String,
}

impl Default for DirectiveExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ANSWER_MARKER)
    }
}

impl DirectiveExtractor {
    /// Create an extractor that cuts echoed prompt text at `answer_marker`.
    pub fn new(answer_marker: &str) -> Self {
        Self {
            answer_marker: answer_marker.trim().to_string(),
        }
    }

    /// Parse `raw` into visible text and directives.
    pub fn extract(&self, raw: &str) -> Extraction {
        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let body = self.after_answer_marker(&normalized);
        let lines: Vec<&str> = body.lines().collect();

        let mut directives = Vec::new();

        let mut paragraphs = group_paragraphs(&lines, |line| !is_echo_line(line));
        if paragraphs.is_empty() {
            paragraphs = group_paragraphs(&lines, |_| true);
        }

        let mut kept: Vec<String> = Vec::new();
        for paragraph in paragraphs {
            let mut visible_lines = Vec::new();
            for line in paragraph {
                let had_facts = line.contains(FACT_KEYWORD);
                let visible = split_facts(line, &mut directives);
                if site_request_domain(line).is_some()
                    || visible.is_empty()
                    || (had_facts && is_echo_line(&visible))
                {
                    continue;
                }
                visible_lines.push(visible);
            }
            if !visible_lines.is_empty() {
                kept.push(visible_lines.join("\n"));
            }
        }

        let mut domains: Vec<String> = Vec::new();
        for line in &lines {
            if let Some(domain) = site_request_domain(line)
                && !domain.is_empty()
                && !domains.contains(&domain)
            {
                domains.push(domain);
            }
        }
        directives.extend(domains.into_iter().map(Directive::FetchRequest));

        let visible = clamp_paragraphs(&kept.join("\n\n"), MAX_PARAGRAPHS);
        let visible = if visible.trim().is_empty() {
            SAFE_DEFAULT_ANSWER.to_string()
        } else {
            visible
        };

        Extraction {
            visible,
            directives,
        }
    }

    /// Text after the last line that starts with the answer marker.
    fn after_answer_marker<'a>(&self, text: &'a str) -> &'a str {
        let marker = self.answer_marker.as_str();
        if marker.is_empty() {
            return text;
        }

        let mut cut = None;
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let indent = line.len() - line.trim_start().len();
            let rest = &line[indent..];
            if rest
                .get(..marker.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(marker))
            {
                cut = Some(offset + indent + marker.len());
            }
            offset += line.len();
        }

        cut.map_or(text, |i| &text[i..])
    }
}

/// Keep at most `max` blank-line-separated paragraphs.
///
/// Text with `max` paragraphs or fewer is returned unchanged.
pub fn clamp_paragraphs(text: &str, max: usize) -> String {
    let paragraphs: Vec<&str> = PARAGRAPH_BREAK
        .split(text)
        .filter(|p| !p.trim().is_empty())
        .collect();
    if paragraphs.len() <= max {
        return text.to_string();
    }
    paragraphs[..max].join("\n\n")
}

/// Append a fetched-site summary under its heading.
pub fn append_web_results(visible: &str, summary: &str) -> String {
    format!("{visible}\n\n{WEB_RESULTS_HEADING}\n{}", summary.trim())
}

/// Group trimmed lines into paragraphs. Blank lines separate paragraphs;
/// lines failing `keep` are dropped without breaking the paragraph.
fn group_paragraphs<'a>(lines: &[&'a str], keep: impl Fn(&str) -> bool) -> Vec<Vec<&'a str>> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if keep(trimmed) {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Whether a trimmed line repeats the prompt or is a control token.
fn is_echo_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if SECTION_LABELS.contains(&lower.as_str()) || CONTROL_TOKENS.contains(&lower.as_str()) {
        return true;
    }
    if CHAT_TOKEN.is_match(&lower) {
        return true;
    }
    line.strip_prefix("- ")
        .is_some_and(|rule| PROMPT_RULES.iter().any(|r| r.eq_ignore_ascii_case(rule.trim())))
}

/// Domain named by a `SITE_REQUEST:` line, if this is one.
///
/// Only the first word before any fact keyword names the domain.
fn site_request_domain(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let label = SITE_REQUEST_LABEL;
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..]
        .split(FACT_KEYWORD)
        .next()
        .unwrap_or_default();
    Some(normalize_domain(
        rest.split_whitespace().next().unwrap_or_default(),
    ))
}

/// Split fact keywords off `line`, returning the visible remainder.
fn split_facts(line: &str, directives: &mut Vec<Directive>) -> String {
    let mut parts = line.split(FACT_KEYWORD);
    let visible = parts.next().unwrap_or_default().trim().to_string();
    for fact in parts {
        directives.push(Directive::LearnedFact(fact.trim().to_string()));
    }
    visible
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn extract(raw: &str) -> Extraction {
        DirectiveExtractor::default().extract(raw)
    }

    #[test]
    fn plain_answer_passes_through() {
        let out = extract("Keep running four days a week.");
        assert_eq!(out.visible, "Keep running four days a week.");
        assert!(out.directives.is_empty());
    }

    #[test]
    fn echoed_prompt_is_cut_at_answer_marker() {
        let raw = "You are a tiny offline AI.\nQUESTION:\nShould I run?\nANSWER:\nYes, run on Tuesday.";
        let out = extract(raw);
        assert_eq!(out.visible, "Yes, run on Tuesday.");
    }

    #[test]
    fn text_after_marker_on_same_line_is_kept() {
        let out = extract("FACTS:\nnothing\nAnswer: Apply to the VA.");
        assert_eq!(out.visible, "Apply to the VA.");
    }

    #[test]
    fn last_marker_wins() {
        let out = extract("Answer: first try\nanswer: second try");
        assert_eq!(out.visible, "second try");
    }

    #[test]
    fn marker_is_configurable() {
        let extractor = DirectiveExtractor::new("Reply:");
        let out = extractor.extract("echo\nReply: Hydrate well.");
        assert_eq!(out.visible, "Hydrate well.");
        // The default marker means nothing to this extractor.
        let out = extractor.extract("Answer: kept whole");
        assert_eq!(out.visible, "Answer: kept whole");
    }

    #[test]
    fn missing_marker_keeps_everything() {
        let out = extract("Line one.\nLine two.");
        assert_eq!(out.visible, "Line one.\nLine two.");
    }

    #[test]
    fn echo_lines_are_dropped() {
        let raw = "FACTS:\nI run with Front Runners.\nRULES:\n- Do not include headings or formatting.\n</s>\n<|assistant|>";
        let out = extract(raw);
        assert_eq!(out.visible, "I run with Front Runners.");
    }

    #[test]
    fn all_echo_falls_back_to_unfiltered_text() {
        let out = extract("FACTS:\n\nGOALS:");
        assert_eq!(out.visible, "FACTS:\n\nGOALS:");
    }

    #[test]
    fn fact_is_split_from_visible_text() {
        let out = extract("Study daily. NEW_FACT: exam is in March");
        assert_eq!(out.visible, "Study daily.");
        assert_eq!(
            out.directives,
            vec![Directive::LearnedFact("exam is in March".into())]
        );
    }

    #[test]
    fn multiple_facts_on_one_line() {
        let out = extract("Rest. NEW_FACT: a NEW_FACT: b");
        assert_eq!(out.visible, "Rest.");
        let facts: Vec<&str> = out.learned_facts().collect();
        assert_eq!(facts, vec!["a", "b"]);
    }

    #[test]
    fn fact_only_line_contributes_nothing() {
        let out = extract("Keep going.\nNEW_FACT:likes trail running");
        assert_eq!(out.visible, "Keep going.");
        assert_eq!(out.learned_facts().count(), 1);
    }

    #[test]
    fn site_requests_become_directives() {
        let raw = "Check the benefits page.\nSITE_REQUEST: ssa.gov\nsite_request: https://www.VA.gov/jobs\nSITE_REQUEST: ssa.gov";
        let out = extract(raw);
        assert_eq!(out.visible, "Check the benefits page.");
        assert_eq!(out.fetch_requests(), vec!["ssa.gov", "www.va.gov"]);
    }

    #[test]
    fn fact_on_site_request_line_is_kept_apart() {
        let out = extract("Check it.\nSITE_REQUEST: ssa.gov NEW_FACT: has SSA account");
        assert_eq!(out.visible, "Check it.");
        assert_eq!(out.learned_facts().collect::<Vec<_>>(), vec!["has SSA account"]);
        assert_eq!(out.fetch_requests(), vec!["ssa.gov"]);
    }

    #[test]
    fn site_request_takes_first_word_only() {
        let out = extract("SITE_REQUEST: va.gov please");
        assert_eq!(out.fetch_requests(), vec!["va.gov"]);
    }

    #[test]
    fn echo_left_in_front_of_fact_is_dropped() {
        let raw = "Study daily.\n- Do not include headings or formatting. NEW_FACT: x";
        let out = extract(raw);
        assert_eq!(out.visible, "Study daily.");
        assert_eq!(out.learned_facts().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(extract(&out.visible).visible, out.visible);

        let out = extract("Rest well.\nRULES: NEW_FACT: sleeps late");
        assert_eq!(out.visible, "Rest well.");
        assert_eq!(out.learned_facts().count(), 1);
    }

    #[test]
    fn site_request_before_marker_is_ignored() {
        let out = extract("SITE_REQUEST: echo.gov\nAnswer: fine");
        assert!(out.fetch_requests().is_empty());
    }

    #[test]
    fn only_three_paragraphs_survive() {
        let out = extract("one\n\ntwo\n\nthree\n\nfour");
        assert_eq!(out.visible, "one\n\ntwo\n\nthree");
    }

    #[test]
    fn empty_result_uses_safe_default() {
        assert_eq!(extract("").visible, SAFE_DEFAULT_ANSWER);
        assert_eq!(extract("NEW_FACT: only a fact").visible, SAFE_DEFAULT_ANSWER);
        assert_eq!(extract("SITE_REQUEST: ssa.gov").visible, SAFE_DEFAULT_ANSWER);
    }

    #[test]
    fn carriage_returns_are_normalized() {
        let out = extract("first\r\n\r\nsecond");
        assert_eq!(out.visible, "first\n\nsecond");
    }

    #[test]
    fn web_results_are_appended_under_heading() {
        let text = append_web_results("Answer text.", "[ssa.gov] Social Security\n");
        assert_eq!(
            text,
            "Answer text.\n\n--- Web results ---\n[ssa.gov] Social Security"
        );
    }

    #[test]
    fn clamp_leaves_short_text_untouched() {
        let text = "a\n\n\n  \nb";
        assert_eq!(clamp_paragraphs(text, 3), text);
    }

    fn word() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    fn line() -> impl Strategy<Value = String> {
        prop::collection::vec(word(), 1..6).prop_map(|w| w.join(" "))
    }

    fn paragraph() -> impl Strategy<Value = String> {
        prop::collection::vec(line(), 1..4).prop_map(|l| l.join("\n"))
    }

    /// Echoed prompt text that can precede a fact on the same line.
    fn echo_prefix() -> impl Strategy<Value = String> {
        let mut echoes: Vec<String> = PROMPT_RULES
            .iter()
            .filter(|rule| !rule.contains(FACT_KEYWORD))
            .map(|rule| format!("- {rule}"))
            .collect();
        echoes.extend(["FACTS:", "RULES:", "</s>", "<|assistant|>"].map(String::from));
        prop::sample::select(echoes)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: extraction is idempotent on its own output.
        #[test]
        fn prop_extraction_is_idempotent(
            paragraphs in prop::collection::vec(paragraph(), 0..6),
            fact in prop::option::of(line()),
            echoed_fact in prop::option::of((echo_prefix(), line())),
        ) {
            let mut raw = paragraphs.join("\n\n");
            if let Some(fact) = fact {
                raw.push_str(&format!(" {FACT_KEYWORD} {fact}"));
            }
            if let Some((echo, fact)) = echoed_fact {
                raw.push_str(&format!("\n{echo} {FACT_KEYWORD} {fact}"));
            }
            let first = extract(&raw);
            let second = extract(&first.visible);
            prop_assert_eq!(&second.visible, &first.visible);
            prop_assert!(second.directives.is_empty());
        }

        /// Property: N fact keywords yield N facts and none stay visible.
        #[test]
        fn prop_fact_count_matches_keyword_count(
            lines in prop::collection::vec((line(), prop::collection::vec(line(), 0..3)), 1..6),
        ) {
            let mut expected = 0;
            let raw: Vec<String> = lines
                .iter()
                .map(|(text, facts)| {
                    expected += facts.len();
                    let mut l = text.clone();
                    for f in facts {
                        l.push_str(&format!(" {FACT_KEYWORD}{f}"));
                    }
                    l
                })
                .collect();
            let out = extract(&raw.join("\n"));
            prop_assert_eq!(out.learned_facts().count(), expected);
            prop_assert!(!out.visible.contains(FACT_KEYWORD));
        }

        /// Property: clamping never adds paragraphs and is a no-op at three or fewer.
        #[test]
        fn prop_clamp_never_grows(paragraphs in prop::collection::vec(paragraph(), 1..8)) {
            let text = paragraphs.join("\n\n");
            let clamped = clamp_paragraphs(&text, MAX_PARAGRAPHS);
            let count = |t: &str| PARAGRAPH_BREAK.split(t).filter(|p| !p.trim().is_empty()).count();
            prop_assert!(count(&clamped) <= count(&text));
            prop_assert!(count(&clamped) <= MAX_PARAGRAPHS);
            if paragraphs.len() <= MAX_PARAGRAPHS {
                prop_assert_eq!(clamped, text);
            }
        }
    }
}
