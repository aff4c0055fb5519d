//! The orchestrator loop: the heart of Helmsman.
//!
//! A session follows a **Generate → Act → Verify** cycle:
//!
//! 1. **Await input** (initial prompt, task list, console, or a synthetic continuation)
//! 2. **Build context** (memory hint, system prompt with tools, repository listing, active files)
//! 3. **Decide** via the model router, with a keyboard listener attached for cancellation
//! 4. **If no tools**: check for lazy-agent replies, then show or correct
//! 5. **If tools**: execute in order, supervise each result, then continue, retry or fix
//!
//! The loop ends when input runs out.

pub mod classifier;
pub mod console;
pub mod orchestrator;
pub mod prompt;

pub use classifier::{BehaviorClassifier, LazyBehavior, PatternClassifier};
pub use console::{Console, KeyListener, TerminalConsole};
pub use orchestrator::{
    CONTINUE_SENTINEL, CORRECTIVE_INSTRUCTION, NO_MEMORY, Orchestrator, SUPERVISOR_PROMPT,
    SessionSummary,
};
pub use prompt::{DEFAULT_PERSONA, SystemPromptBuilder};
