//! Typed parameter schemas for every capability.
//!
//! Planning output arrives as loose JSON. Before anything executes it is
//! parsed into [`CapabilityParams`], a union tagged by capability name whose
//! variants reject unknown fields. Portuguese field names emitted by the
//! reasoning model are accepted as serde aliases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;

/// Canonical capability names, in pipeline order.
pub const CAPABILITY_NAMES: &[&str] = &[
    "search_activity_catalog",
    "search_account_activities",
    "decide_activities",
    "generate_activity_content",
    "create_activity",
    "save_activities",
    "create_document",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSearchParams {
    #[serde(default, alias = "disciplina", skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, alias = "serie", skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, alias = "limite", skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSearchParams {
    #[serde(default, alias = "limite", skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecideParams {
    /// Free-text request the decision is made for. Required.
    #[serde(alias = "contexto")]
    pub context: String,
    #[serde(default, alias = "quantidade", skip_serializing_if = "Option::is_none")]
    pub quantity: Option<usize>,
    #[serde(default, alias = "disciplina", skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, alias = "serie", skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentParams {
    #[serde(default, alias = "contexto", skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, alias = "tema", skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateActivityParams {
    #[serde(default, alias = "contexto", skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Restrict creation to one decided activity.
    #[serde(default, alias = "atividade_id", skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, alias = "titulo", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveParams {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentParams {
    #[serde(default, alias = "tipo", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentKind>,
    #[serde(default, alias = "titulo", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[serde(alias = "dossie")]
    Dossier,
    #[serde(alias = "resumo")]
    Summary,
    #[serde(alias = "roteiro")]
    Script,
}

/// Parameters of one capability call, tagged by capability name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", content = "params", rename_all = "snake_case")]
pub enum CapabilityParams {
    SearchActivityCatalog(CatalogSearchParams),
    SearchAccountActivities(AccountSearchParams),
    DecideActivities(DecideParams),
    GenerateActivityContent(ContentParams),
    CreateActivity(CreateActivityParams),
    SaveActivities(SaveParams),
    CreateDocument(DocumentParams),
}

impl CapabilityParams {
    /// Parse a loose parameter object for the named capability.
    ///
    /// `null` is treated as an empty object. Unknown capability names yield
    /// [`CapabilityError::NotFound`]; unknown or malformed fields and missing
    /// required ones yield [`CapabilityError::InvalidParams`].
    pub fn parse(capability: &str, params: Value) -> Result<Self, CapabilityError> {
        if !CAPABILITY_NAMES.contains(&capability) {
            return Err(CapabilityError::NotFound(capability.to_string()));
        }

        let params = match params {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let tagged = serde_json::json!({ "capability": capability, "params": params });
        serde_json::from_value(tagged).map_err(|e| CapabilityError::InvalidParams {
            capability: capability.to_string(),
            reason: e.to_string(),
        })
    }

    /// The capability name this parameter set belongs to.
    pub fn capability_name(&self) -> &'static str {
        match self {
            Self::SearchActivityCatalog(_) => "search_activity_catalog",
            Self::SearchAccountActivities(_) => "search_account_activities",
            Self::DecideActivities(_) => "decide_activities",
            Self::GenerateActivityContent(_) => "generate_activity_content",
            Self::CreateActivity(_) => "create_activity",
            Self::SaveActivities(_) => "save_activities",
            Self::CreateDocument(_) => "create_document",
        }
    }

    /// The untagged parameter object, as it would appear in a plan.
    pub fn to_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("params").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}
