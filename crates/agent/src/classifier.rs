//! Lazy-agent detection.
//!
//! A conversational reply (no tool call) is checked for three ways a model
//! avoids doing work: refusing file actions it can perform through tools,
//! claiming file changes no tool made, and telling the user to do it.

use regex_lite::Regex;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyBehavior {
    Refusal,
    Hallucination,
    LazyInstruction,
}

impl std::fmt::Display for LazyBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refusal => write!(f, "refusal"),
            Self::Hallucination => write!(f, "hallucination"),
            Self::LazyInstruction => write!(f, "lazy_instruction"),
        }
    }
}

/// Classifies a tool-less reply.
pub trait BehaviorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Option<LazyBehavior>;
}

const REFUSAL: &[&str] = &[
    r"(?i)\b(cannot|can't|can not|unable to|not able to|no access to|don't have access to|do not have access to|don't have the ability to|do not have the ability to)\b[^.\n]{0,80}\b(create|write|modify|edit|save|delete|update|change|make|generate|read|open|access)\b[^.\n]{0,80}\b(files?|director(y|ies)|folders?|file ?system|disk)\b",
    r"(?i)\bas an ai\b[^.\n]{0,60}\b(cannot|can't|unable|don't|do not)\b",
];

const HALLUCINATION: &[&str] = &[
    r"(?i)\bi(\s+have|'ve)?\s+(now\s+|successfully\s+|just\s+)?(created|written|wrote|modified|updated|saved|edited|generated|added|deleted|renamed)\b[^.\n]{0,80}\b(files?|director(y|ies)|folders?|[A-Za-z0-9_-]+\.[A-Za-z0-9]{1,6})\b",
    r"(?i)\b(files?|[A-Za-z0-9_-]+\.[A-Za-z0-9]{1,6})\b[^.\n]{0,60}\b(has|have) been (successfully\s+)?(created|written|saved|updated|modified|generated)\b",
];

const LAZY_INSTRUCTION: &[&str] = &[
    r"(?i)\b(you (can|should|could|will need to|need to|may want to|might want to)|please|simply|just)\s+(manually\s+)?(create|write|save|copy|paste|add|put|modify|edit|update|open|run)\b[^.\n]{0,80}\b(files?|following|code|contents?|script|[A-Za-z0-9_-]+\.[A-Za-z0-9]{1,6})\b",
    r"(?i)\b(copy|paste)\s+(this|the following|the code|it|the snippet)\b[^.\n]{0,40}\b(into|to|in)\b",
    r"(?i)\bsave (this|the following|it) as\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            Regex::new(p)
                .map_err(|e| warn!(pattern = %p, error = %e, "Invalid classifier pattern"))
                .ok()
        })
        .collect()
}

/// Regular-expression classifier; checks are independent and run in order.
pub struct PatternClassifier {
    checks: Vec<(LazyBehavior, Vec<Regex>)>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self {
            checks: vec![
                (LazyBehavior::Refusal, compile(REFUSAL)),
                (LazyBehavior::Hallucination, compile(HALLUCINATION)),
                (LazyBehavior::LazyInstruction, compile(LAZY_INSTRUCTION)),
            ],
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorClassifier for PatternClassifier {
    fn classify(&self, message: &str) -> Option<LazyBehavior> {
        self.checks
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(message)))
            .map(|(behavior, _)| *behavior)
    }
}
