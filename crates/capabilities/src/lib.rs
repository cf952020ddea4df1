//! Built-in capabilities for Mentor.
//!
//! Capabilities give the agent its effects on the teacher's world:
//! search the activity catalog and the account, decide what to create,
//! generate content, create and save activities, and write complementary
//! documents. They share one [`ActivityStore`] and exchange data through
//! [`ExecutionContext::previous_results`](mentor_core::ExecutionContext).

pub mod catalog;
pub mod content;
pub mod create;
pub mod decide;
pub mod document;
pub mod save;
pub mod search;
pub mod store;

use mentor_core::capability::CapabilityRegistry;
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;

pub use store::{Activity, ActivityStore};

/// Create a registry with all built-in capabilities over `store`.
pub fn default_registry(store: ActivityStore) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(Box::new(search::CatalogSearch));
    registry.register(Box::new(search::AccountSearch::new(store.clone())));
    registry.register(Box::new(decide::DecideActivities));
    registry.register(Box::new(content::GenerateContent));
    registry.register(Box::new(create::CreateActivity::new(store.clone())));
    registry.register(Box::new(save::SaveActivities::new(store.clone())));
    registry.register(Box::new(document::CreateDocument::new(store)));
    registry
}

pub(crate) fn unexpected_params(capability: &str, params: &CapabilityParams) -> CapabilityError {
    CapabilityError::InvalidParams {
        capability: capability.to_string(),
        reason: format!("received parameters for {}", params.capability_name()),
    }
}
