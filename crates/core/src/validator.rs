//! Capability name validation.
//!
//! Reasoning models invent or misspell capability names. Every name coming
//! out of planning passes through [`CapabilityRegistry::validate`]:
//! exact names pass, known aliases are rewritten, close misspellings are
//! corrected by normalized edit distance, and everything else is rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::capability::{CapabilityCategory, CapabilityRegistry};
use crate::params::CapabilityParams;

/// Minimum normalized similarity for a fuzzy correction.
pub const SIMILARITY_THRESHOLD: f64 = 0.4;

/// Legacy and commonly hallucinated names, mapped to canonical ones.
const ALIASES: &[(&str, &str)] = &[
    ("pesquisar_atividades_disponiveis", "search_activity_catalog"),
    ("pesquisar_tipos_atividades", "search_activity_catalog"),
    ("pesquisar_catalogo", "search_activity_catalog"),
    ("buscar_atividades", "search_activity_catalog"),
    ("consultar_atividades", "search_activity_catalog"),
    ("search_catalog", "search_activity_catalog"),
    ("pesquisar_atividades_conta", "search_account_activities"),
    ("pesquisar_minhas_atividades", "search_account_activities"),
    ("buscar_atividades_anteriores", "search_account_activities"),
    ("minhas_atividades", "search_account_activities"),
    ("decidir_atividades_criar", "decide_activities"),
    ("decidir_atividades", "decide_activities"),
    ("escolher_atividades", "decide_activities"),
    ("selecionar_atividades", "decide_activities"),
    ("gerar_conteudo_atividades", "generate_activity_content"),
    ("gerar_conteudo", "generate_activity_content"),
    ("criar_atividade", "create_activity"),
    ("criar_atividades", "create_activity"),
    ("criar", "create_activity"),
    ("gerar_atividade", "create_activity"),
    ("nova_atividade", "create_activity"),
    ("construir_atividade", "create_activity"),
    ("construir_atividades", "create_activity"),
    ("salvar_atividades_bd", "save_activities"),
    ("salvar_atividades", "save_activities"),
    ("criar_arquivo", "create_document"),
    ("gerar_documento", "create_document"),
];

/// Outcome of validating one capability name.
#[derive(Debug, Clone, PartialEq)]
pub enum NameValidation {
    /// The name is registered as-is.
    Exact(String),
    /// The name is a known alias of a registered capability.
    Alias { original: String, canonical: String },
    /// The name is close enough to exactly one registered capability.
    Fuzzy {
        original: String,
        suggestion: String,
        score: f64,
    },
    /// No acceptable match.
    Invalid { original: String, reason: String },
}

impl NameValidation {
    /// The canonical name this validation resolves to, if any.
    pub fn normalized(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            Self::Alias { canonical, .. } => Some(canonical),
            Self::Fuzzy { suggestion, .. } => Some(suggestion),
            Self::Invalid { .. } => None,
        }
    }

    /// True for exact and alias matches, the ones that need no guessing.
    pub fn is_exact_or_alias(&self) -> bool {
        matches!(self, Self::Exact(_) | Self::Alias { .. })
    }
}

/// Similarity in `[0, 1]` between two names, ignoring case, `-` and `_`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_for_comparison(a);
    let b = normalize_for_comparison(b);

    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 {
        return 1.0;
    }

    let distance = strsim::levenshtein(&a, &b);
    (longer - distance.min(longer)) as f64 / longer as f64
}

fn normalize_for_comparison(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect()
}

/// A capability call as it appears in a plan.
///
/// `display_name` and `category` are overwritten by validation with the
/// registry's values, whatever the planner produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCapability {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub category: Option<CapabilityCategory>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub order: u32,
}

/// Result of validating a whole plan.
#[derive(Debug, Clone, Default)]
pub struct PlanValidation {
    /// Calls that survived, with canonical names and registry metadata.
    pub calls: Vec<PlannedCapability>,
    /// One entry per alias or fuzzy rewrite.
    pub corrections: Vec<String>,
    /// One entry per dropped call.
    pub errors: Vec<String>,
}

impl PlanValidation {
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty() && self.errors.is_empty()
    }
}

/// Names grouped by category, plus a prompt fragment listing them.
#[derive(Debug, Clone)]
pub struct CapabilityWhitelist {
    pub names: Vec<String>,
    pub by_category: BTreeMap<CapabilityCategory, Vec<String>>,
    pub display_names: BTreeMap<String, String>,
    pub prompt: String,
}

impl CapabilityRegistry {
    /// Validate one name against the registry.
    pub fn validate(&self, name: &str) -> NameValidation {
        if self.contains(name) {
            return NameValidation::Exact(name.to_string());
        }

        if let Some((_, canonical)) = ALIASES.iter().find(|(alias, _)| *alias == name)
            && self.contains(canonical)
        {
            return NameValidation::Alias {
                original: name.to_string(),
                canonical: canonical.to_string(),
            };
        }

        let mut best: Option<(&str, f64)> = None;
        for candidate in self.names() {
            let score = similarity(name, candidate);
            if score >= SIMILARITY_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((suggestion, score)) => NameValidation::Fuzzy {
                original: name.to_string(),
                suggestion: suggestion.to_string(),
                score,
            },
            None => NameValidation::Invalid {
                original: name.to_string(),
                reason: format!(
                    "capability \"{name}\" does not exist; valid names: {}",
                    self.names().join(", ")
                ),
            },
        }
    }

    /// Canonical name for `name`, if any match is acceptable.
    pub fn normalize(&self, name: &str) -> Option<String> {
        self.validate(name).normalized().map(str::to_string)
    }

    /// Validate every call of a plan.
    ///
    /// Names are normalized, parameters are parsed against the capability's
    /// schema, and display metadata is replaced with registry values.
    /// Calls that fail either check are dropped and recorded in `errors`.
    pub fn validate_plan(&self, calls: Vec<PlannedCapability>) -> PlanValidation {
        let mut report = PlanValidation::default();

        for mut call in calls {
            let validation = self.validate(&call.name);
            let canonical = match &validation {
                NameValidation::Exact(name) => name.clone(),
                NameValidation::Alias { original, canonical } => {
                    report
                        .corrections
                        .push(format!("\"{original}\" -> \"{canonical}\" (alias)"));
                    canonical.clone()
                }
                NameValidation::Fuzzy {
                    original,
                    suggestion,
                    score,
                } => {
                    tracing::warn!(
                        original = %original,
                        corrected = %suggestion,
                        score = *score,
                        "Corrected unknown capability name"
                    );
                    report
                        .corrections
                        .push(format!("\"{original}\" -> \"{suggestion}\" (similarity {score:.2})"));
                    suggestion.clone()
                }
                NameValidation::Invalid { original, reason } => {
                    tracing::warn!(capability = %original, "Dropped invalid capability from plan");
                    report.errors.push(reason.clone());
                    continue;
                }
            };

            if let Err(e) = CapabilityParams::parse(&canonical, call.params.clone()) {
                tracing::warn!(capability = %canonical, error = %e, "Dropped plan call with invalid parameters");
                report.errors.push(e.to_string());
                continue;
            }

            let Some(capability) = self.find(&canonical) else {
                continue;
            };
            call.name = canonical;
            call.display_name = capability.display_name().to_string();
            call.category = Some(capability.category());
            report.calls.push(call);
        }

        report
    }

    /// Whitelist of valid names for prompts that plan capability calls.
    pub fn whitelist(&self) -> CapabilityWhitelist {
        let mut names = Vec::new();
        let mut by_category: BTreeMap<CapabilityCategory, Vec<String>> = BTreeMap::new();
        let mut display_names = BTreeMap::new();

        for descriptor in self.descriptors() {
            names.push(descriptor.name.clone());
            by_category
                .entry(descriptor.category)
                .or_default()
                .push(descriptor.name.clone());
            display_names.insert(descriptor.name, descriptor.display_name);
        }

        let mut prompt = String::from("VALID CAPABILITY NAMES (copy exactly):\n");
        for (category, members) in &by_category {
            prompt.push_str(&format!("{category}:\n"));
            for name in members {
                let label = display_names.get(name).map(String::as_str).unwrap_or_default();
                prompt.push_str(&format!("  - \"{name}\": {label}\n"));
            }
        }
        prompt.push_str("Never invent capability names. If something is not listed, it is not available.");

        CapabilityWhitelist {
            names,
            by_category,
            display_names,
            prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::test_support::registry;
    use serde_json::json;

    fn planned(name: &str, params: serde_json::Value) -> PlannedCapability {
        PlannedCapability {
            id: format!("cap-{name}"),
            name: name.into(),
            display_name: "whatever the planner said".into(),
            category: Some(CapabilityCategory::Persist),
            params,
            order: 1,
        }
    }

    #[test]
    fn every_registered_name_is_exact() {
        let registry = registry();
        for name in registry.names() {
            let v = registry.validate(name);
            assert_eq!(v, NameValidation::Exact(name.to_string()));
            assert_eq!(v.normalized(), Some(name));
        }
    }

    #[test]
    fn alias_is_normalized() {
        let registry = registry();
        let v = registry.validate("pesquisar_atividades_disponiveis");
        assert!(v.is_exact_or_alias());
        assert_eq!(v.normalized(), Some("search_activity_catalog"));
    }

    #[test]
    fn alias_to_unregistered_capability_is_not_used() {
        let registry = registry();
        let v = registry.validate("salvar_atividades_bd");
        assert!(!v.is_exact_or_alias());
    }

    #[test]
    fn misspelling_is_fuzzy_corrected() {
        let registry = registry();
        let v = registry.validate("Search-Activty-Catalog");
        match v {
            NameValidation::Fuzzy { suggestion, score, .. } => {
                assert_eq!(suggestion, "search_activity_catalog");
                assert!(score >= SIMILARITY_THRESHOLD);
            }
            other => panic!("expected fuzzy match, got {other:?}"),
        }
    }

    #[test]
    fn distant_name_is_invalid() {
        let registry = registry();
        let v = registry.validate("xyz");
        assert!(matches!(v, NameValidation::Invalid { .. }));
        assert_eq!(v.normalized(), None);
        assert_eq!(registry.normalize("xyz"), None);
    }

    #[test]
    fn similarity_ignores_case_and_separators() {
        assert_eq!(similarity("Create-Activity", "create_activity"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert!(similarity("abc", "xyz") < SIMILARITY_THRESHOLD);
    }

    #[test]
    fn validate_plan_overwrites_metadata_and_drops_invalid() {
        let registry = registry();
        let report = registry.validate_plan(vec![
            planned("search_activity_catalog", json!({ "disciplina": "artes" })),
            planned("pesquisar_catalogo", json!({})),
            planned("search_activty_catalog", json!({})),
            planned("xyz", json!({})),
            planned("search_activity_catalog", json!({ "unexpected": true })),
        ]);

        assert_eq!(report.calls.len(), 3);
        assert_eq!(report.corrections.len(), 2);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_clean());

        for call in &report.calls {
            assert_eq!(call.name, "search_activity_catalog");
            assert_eq!(call.display_name, "Searching catalog");
            assert_eq!(call.category, Some(CapabilityCategory::Search));
        }
    }

    #[test]
    fn whitelist_groups_by_category() {
        let registry = registry();
        let whitelist = registry.whitelist();
        assert_eq!(whitelist.names, vec!["search_activity_catalog"]);
        assert_eq!(
            whitelist.by_category[&CapabilityCategory::Search],
            vec!["search_activity_catalog".to_string()]
        );
        assert!(whitelist.prompt.contains("\"search_activity_catalog\""));
    }
}
