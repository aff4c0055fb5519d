//! Output shaping: the last step before a decision leaves the router.
//!
//! Shaping runs on cached and live decisions alike, so a cache hit never
//! looks different from a fresh answer.

use helmsman_core::Decision;

/// Post-processes parsed decisions.
pub trait OutputShaper: Send + Sync {
    fn shape(&self, decision: Decision) -> Decision;
}

/// Normalizes whitespace in user-facing text and optionally signs
/// conversational replies with the persona's name.
#[derive(Debug, Clone, Default)]
pub struct PersonaShaper {
    signature: Option<String>,
}

impl PersonaShaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            signature: (!name.trim().is_empty()).then(|| name.trim().to_string()),
        }
    }

    fn tidy(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut blank_run = 0;
        for line in text.trim().lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }
}

impl OutputShaper for PersonaShaper {
    fn shape(&self, mut decision: Decision) -> Decision {
        decision.message = Self::tidy(&decision.message);
        decision.thought = Self::tidy(&decision.thought);

        if let Some(name) = &self.signature
            && !decision.requests_tools()
            && !decision.message.is_empty()
        {
            decision.message.push_str("\n\n-- ");
            decision.message.push_str(name);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_blank_runs_and_trailing_space() {
        let shaped = PersonaShaper::new().shape(Decision::message_only("  one  \n\n\n\ntwo\t\n"));
        assert_eq!(shaped.message, "one\n\ntwo");
    }

    #[test]
    fn signs_conversational_replies() {
        let shaped = PersonaShaper::signed("Helm").shape(Decision::message_only("Done."));
        assert_eq!(shaped.message, "Done.\n\n-- Helm");
    }

    #[test]
    fn tool_decisions_are_not_signed() {
        let mut decision = Decision::message_only("Reading the file");
        decision.tool = "read_file".into();
        let shaped = PersonaShaper::signed("Helm").shape(decision);
        assert_eq!(shaped.message, "Reading the file");
    }

    #[test]
    fn blank_signature_is_ignored() {
        let shaped = PersonaShaper::signed("  ").shape(Decision::message_only("Hi"));
        assert_eq!(shaped.message, "Hi");
    }
}
