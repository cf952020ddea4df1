//! Prompt context management.
//!
//! - [`ContextEngine`]: ordered, token-budgeted blocks per session, with
//!   lossy compression of older history
//! - [`token`]: character-based token estimation

pub mod engine;
pub mod token;

pub use engine::{BlockKind, ContextBlock, ContextEngine};
pub use token::estimate_tokens;
