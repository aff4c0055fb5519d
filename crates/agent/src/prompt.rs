//! System prompt assembly.
//!
//! Sections, in order: persona and skills, available tools, repository
//! listing, active files, and the reply format the router's parser expects.

use helmsman_core::ToolSet;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_PERSONA: &str = "You are Helmsman, an autonomous software agent. You complete tasks \
by calling tools, one step at a time, and you verify your work as you go.";

const REPLY_FORMAT: &str = r#"## Reply format
Reply with a JSON object:
{"thought": "<your reasoning>", "tool": "<tool name, or none>", "args": {<tool arguments>}, "message": "<text for the user>"}
- To run several tools in order, reply with one such object per tool.
- Use "none" as the tool only when you are talking to the user and no action is needed.
- Never claim that a file was created or changed unless a tool did it in this conversation.
- Never ask the user to create, edit or run files themselves; use the tools."#;

/// Builds the system prompt for each generation.
#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    persona: String,
    skills: Vec<(String, String)>,
}

impl SystemPromptBuilder {
    pub fn new(persona: impl Into<String>) -> Self {
        let persona = persona.into();
        Self {
            persona: if persona.trim().is_empty() {
                DEFAULT_PERSONA.to_string()
            } else {
                persona
            },
            skills: Vec::new(),
        }
    }

    pub fn with_skill(mut self, name: impl Into<String>, instructions: impl Into<String>) -> Self {
        self.skills.push((name.into(), instructions.into()));
        self
    }

    /// Append every `*.md` file in `dir` as a skill, in file-name order.
    /// A missing directory is not an error.
    pub fn load_skills(mut self, dir: &Path) -> Self {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No skills directory");
                return self;
            }
        };

        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();

        for path in files {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match std::fs::read_to_string(&path) {
                Ok(body) if !body.trim().is_empty() => {
                    debug!(skill = %name, "Loaded skill");
                    self.skills.push((name, body.trim().to_string()));
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read skill file"),
            }
        }
        self
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }

    pub fn build(&self, tools: &ToolSet, listing: Option<&str>, active_files: &[String]) -> String {
        let mut prompt = self.persona.trim().to_string();

        if !self.skills.is_empty() {
            prompt.push_str("\n\n## Skills");
            for (name, body) in &self.skills {
                prompt.push_str(&format!("\n### {name}\n{body}\n"));
            }
        }

        prompt.push_str("\n\n## Available tools\n");
        if tools.is_empty() {
            prompt.push_str("(none)\n");
        }
        for tool in tools.iter() {
            prompt.push_str(&format!(
                "- {}: {}\n  parameters: {}\n",
                tool.name(),
                tool.description(),
                tool.parameters_schema()
            ));
        }

        if let Some(listing) = listing.map(str::trim).filter(|l| !l.is_empty()) {
            prompt.push_str(&format!("\n## Repository\n{listing}\n"));
        }

        if !active_files.is_empty() {
            prompt.push_str("\n## Active files\n");
            for path in active_files {
                prompt.push_str(&format!("- {path}\n"));
            }
        }

        prompt.push('\n');
        prompt.push_str(REPLY_FORMAT);
        prompt
    }
}
