//! Interactive inference against a fine-tuned checkpoint

mod backend;
mod repl;

pub use backend::{ChatBackend, GenerationConfig, LlamaChatBackend};
pub use repl::{run_repl, ReplOutcome};
