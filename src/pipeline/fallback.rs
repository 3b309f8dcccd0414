//! Deterministic fallback used when local generation is unavailable.
//!
//! An ordered keyword table, first match wins. Categories overlap ("apply
//! for a running coach job"), so the order below is behavior:
//! - Security+ study
//! - federal jobs (Schedule A variant when memory or question mentions it)
//! - running
//! - diet
//! - catch-all safe default

use tracing::debug;

use crate::pipeline::directives::SAFE_DEFAULT_ANSWER;

/// One row of the fallback table.
#[derive(Debug, Clone)]
pub struct FallbackRule {
    /// Rule name for logging.
    pub name: &'static str,
    /// Matches when the lower-cased question contains any of these.
    pub keywords: &'static [&'static str],
    /// Alternate answer used when this phrase appears in memory or question.
    pub refinement: Option<Refinement>,
    /// Canned recommendation.
    pub answer: &'static str,
}

/// A context-sensitive override of a rule's answer.
#[derive(Debug, Clone)]
pub struct Refinement {
    pub phrase: &'static str,
    pub answer: &'static str,
}

impl FallbackRule {
    fn matches(&self, question: &str) -> bool {
        self.keywords.iter().any(|k| question.contains(k))
    }

    fn answer_for(&self, question: &str, memory: &str) -> &'static str {
        match &self.refinement {
            Some(r) if memory.contains(r.phrase) || question.contains(r.phrase) => r.answer,
            _ => self.answer,
        }
    }
}

/// Keyword-driven decision table.
pub struct FallbackEngine {
    rules: Vec<FallbackRule>,
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl FallbackEngine {
    /// The built-in table.
    pub fn default_rules() -> Self {
        let rules = vec![
            FallbackRule {
                name: "security_plus",
                keywords: &["security+"],
                refinement: None,
                answer: "You should continue preparing for the Security+ exam and keep consistent study habits.",
            },
            FallbackRule {
                name: "federal_jobs",
                keywords: &["job", "apply"],
                refinement: Some(Refinement {
                    phrase: "schedule a",
                    answer: "Use your Schedule A letter and apply to VA, DHS, and Social Security IT or cyber roles.",
                }),
                answer: "Focus on stable federal IT and cybersecurity positions.",
            },
            FallbackRule {
                name: "running",
                keywords: &["run", "front runners"],
                refinement: None,
                answer: "You should continue running with Front Runners on Tuesday, Thursday, Saturday, and Sunday.",
            },
            FallbackRule {
                name: "diet",
                keywords: &["carb", "diet"],
                refinement: None,
                answer: "Reduce carbs, emphasize lean protein, hydrate well, and maintain sleep stability.",
            },
        ];
        Self { rules }
    }

    /// Answer `question` using the table. `memory` is the facts and goals text.
    pub fn answer(&self, question: &str, memory: &str) -> &'static str {
        let question = question.to_lowercase();
        let memory = memory.to_lowercase();

        for rule in &self.rules {
            if rule.matches(&question) {
                debug!(rule = rule.name, "Fallback rule matched");
                return rule.answer_for(&question, &memory);
            }
        }

        debug!("No fallback rule matched, using safe default");
        SAFE_DEFAULT_ANSWER
    }
}
