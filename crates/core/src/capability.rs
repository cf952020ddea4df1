//! Capability trait: the named operations the agent can invoke.
//!
//! Capabilities search, decide, generate or persist content. Each one is
//! registered once in a [`CapabilityRegistry`] and is immutable afterwards.
//! Execution never raises to the caller: every failure becomes a
//! `{success: false, error}` [`CapabilityOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::CapabilityError;
use crate::params::CapabilityParams;

/// Functional grouping of capabilities, used in catalogs and plan cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityCategory {
    Search,
    Decide,
    Generate,
    Create,
    Persist,
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Search => "SEARCH",
            Self::Decide => "DECIDE",
            Self::Generate => "GENERATE",
            Self::Create => "CREATE",
            Self::Persist => "PERSIST",
        };
        f.write_str(label)
    }
}

/// The result envelope returned by every capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,

    /// Short human-readable description of what happened.
    #[serde(default)]
    pub message: String,

    /// Domain payload.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityOutcome {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Read-only state handed to a capability for one invocation.
///
/// `previous_results` holds the latest outcome per capability name from
/// earlier iterations or layers, so downstream steps can consume upstream
/// data without sharing mutable state.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_id: String,
    pub previous_results: HashMap<String, CapabilityOutcome>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            previous_results: HashMap::new(),
        }
    }

    /// The upstream outcome for `capability`, if it succeeded.
    pub fn upstream(&self, capability: &str) -> Option<&CapabilityOutcome> {
        self.previous_results
            .get(capability)
            .filter(|outcome| outcome.success)
    }
}

/// Catalog entry describing a capability to planners and prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub display_name: String,
    pub category: CapabilityCategory,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The core Capability trait.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique canonical name (e.g., "search_activity_catalog").
    fn name(&self) -> &str;

    /// Label shown to users while the capability runs.
    fn display_name(&self) -> &str;

    fn category(&self) -> CapabilityCategory;

    /// What this capability does (sent to the reasoning model).
    fn description(&self) -> &str;

    /// JSON Schema describing the accepted parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the capability with already-validated parameters.
    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> std::result::Result<CapabilityOutcome, CapabilityError>;

    fn to_descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            display_name: self.display_name().to_string(),
            category: self.category(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available capabilities.
///
/// Keyed by canonical name in sorted order, so catalogs rendered from it
/// are stable between runs.
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Box<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: BTreeMap::new(),
        }
    }

    /// Register a capability. A later registration under the same name wins.
    pub fn register(&mut self, capability: Box<dyn Capability>) {
        let name = capability.name().to_string();
        tracing::debug!(capability = %name, "Registered capability");
        self.capabilities.insert(name, capability);
    }

    /// Look up a capability by exact name.
    pub fn find(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities.get(name).map(|c| c.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.values().map(|c| c.to_descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Look up, validate parameters and run a capability.
    ///
    /// Unknown names, invalid parameters and execution errors all come
    /// back as a failed outcome.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> CapabilityOutcome {
        let Some(capability) = self.find(name) else {
            return CapabilityOutcome::failure(CapabilityError::NotFound(name.to_string()).to_string());
        };

        let params = match CapabilityParams::parse(name, params) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(capability = %name, error = %e, "Rejected capability parameters");
                return CapabilityOutcome::failure(e.to_string());
            }
        };

        match capability.execute(params, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(capability = %name, error = %e, "Capability execution failed");
                CapabilityOutcome::failure(e.to_string())
            }
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
