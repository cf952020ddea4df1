//! # Mentor Core
//!
//! Domain types, traits, and error definitions for the Mentor task-execution
//! engine. This crate has no runtime dependencies beyond serde and tokio's
//! sync primitives; it defines the model every other crate builds against.
//!
//! ## Layout
//!
//! - [`capability`]: the capability trait, its outcome envelope and registry
//! - [`params`]: typed parameter schemas, one variant per capability
//! - [`validator`]: name correction and plan validation against the registry
//! - [`provider`]: the reasoning collaborator seam
//! - [`memory`]: memory items, session records and the durable store trait
//! - [`event`]: progress updates broadcast to observers
//! - [`json`]: lenient JSON decoding of model output

pub mod capability;
pub mod error;
pub mod event;
pub mod json;
pub mod memory;
pub mod params;
pub mod provider;
pub mod validator;

// Re-export key types at crate root for ergonomics
pub use capability::{
    Capability, CapabilityCategory, CapabilityDescriptor, CapabilityOutcome, CapabilityRegistry,
    ExecutionContext,
};
pub use error::{CapabilityError, Error, MemoryError, ProviderError, Result};
pub use event::{EventBus, ProgressStatus, ProgressUpdate};
pub use json::{LenientDecode, decode_lenient, extract_json_object};
pub use memory::{DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord, SessionStatus};
pub use params::CapabilityParams;
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, Reasoner, ReasoningOutcome, Usage,
};
pub use validator::{NameValidation, PlanValidation, PlannedCapability};
