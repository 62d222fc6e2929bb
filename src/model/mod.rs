//! Suggestion-service access: prompts, transport, reply parsing and the
//! retrying client that ties them together.

pub mod client;
pub mod parser;
pub mod prompt;
pub mod service;

pub use client::{should_update_firmware, ModelClient, FALLBACK_MARKER};
pub use parser::{parse, parse_object, ParseFailure, ParseStrategy};
pub use service::{CompletionRequest, CompletionService, HttpCompletionService};
