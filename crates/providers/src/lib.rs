//! Reasoning providers for Mentor.
//!
//! Every backend implements [`mentor_core::Provider`]; the agent talks to a
//! [`CascadeReasoner`], which tries the configured providers in order and
//! reports the outcome as a `ReasoningOutcome` envelope.

pub mod cascade;
pub mod openai_compat;
pub mod router;

pub use cascade::{CascadeReasoner, SamplingSettings};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, is_usable};
