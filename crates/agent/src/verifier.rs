//! Post-run quality gate.
//!
//! The verifier condenses an [`AgentState`] into a short summary and asks
//! the reasoner to grade it against five fixed criteria. Grading that fails
//! or cannot be decoded falls back to an approved, moderate score so a
//! broken grader never blocks a turn.

use mentor_config::VerifierConfig;
use mentor_core::json::{LenientDecode, decode_lenient};
use mentor_core::provider::Reasoner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::prompts;
use crate::state::AgentState;

/// Scores below this trigger a retry.
pub const RETRY_SCORE_THRESHOLD: u8 = 40;

/// Approved results at or above this score need no note for the user.
const QUIET_SCORE: u8 = 70;

const FALLBACK_SCORE: u8 = 70;

/// Items shown to the user in a verification note.
const NOTE_ITEMS: usize = 3;

const REASONING_EXCERPT_CHARS: usize = 300;

/// The grading criteria, in prompt order.
pub const CRITERIA: [&str; 5] = [
    "completeness",
    "pedagogical_coherence",
    "content_quality",
    "alignment",
    "integrity",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    #[serde(alias = "baixa")]
    Low,
    #[serde(alias = "media", alias = "média")]
    Medium,
    #[serde(alias = "critica", alias = "crítica", alias = "high", alias = "alta")]
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    #[serde(default, alias = "criterio", alias = "critério")]
    pub criterion: String,
    #[serde(default, alias = "aprovado", alias = "passou")]
    pub passed: bool,
    #[serde(default, alias = "severidade")]
    pub severity: Severity,
    #[serde(default, alias = "nota", alias = "observacao")]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub approved: bool,
    /// 0 to 100.
    pub score: u8,
    pub checks: Vec<VerificationCheck>,
    pub suggestions: Vec<String>,
    pub critical_issues: Vec<String>,
    pub summary: String,
    /// Grading failed and this is the default result.
    #[serde(default)]
    pub fallback: bool,
}

impl VerificationResult {
    /// The result used when grading is unavailable.
    pub fn fallback(score: u8) -> Self {
        Self {
            approved: true,
            score,
            checks: Vec::new(),
            suggestions: Vec::new(),
            critical_issues: Vec::new(),
            summary: "Verificação automática indisponível".into(),
            fallback: true,
        }
    }
}

/// Wire shape of a grading reply.
#[derive(Debug, Default, Deserialize)]
struct RawVerification {
    #[serde(default, alias = "pontuacao", alias = "nota")]
    score: Option<f64>,
    #[serde(default, alias = "verificacoes")]
    checks: Vec<VerificationCheck>,
    #[serde(default, alias = "sugestoes")]
    suggestions: Vec<String>,
    #[serde(default, alias = "problemas_criticos")]
    critical_issues: Vec<String>,
    #[serde(default, alias = "resumo")]
    summary: String,
}

/// Retry when anything critical was found or the score is below 40.
pub fn should_retry(result: &VerificationResult) -> bool {
    !result.critical_issues.is_empty() || result.score < RETRY_SCORE_THRESHOLD
}

/// Short note for the user; empty when there is nothing worth saying.
pub fn format_for_user(result: &VerificationResult) -> String {
    if result.approved && result.score >= QUIET_SCORE && result.critical_issues.is_empty() {
        return String::new();
    }

    let mut note = format!("Observação de qualidade ({}/100):", result.score);
    let items: Vec<&String> = result
        .critical_issues
        .iter()
        .chain(result.suggestions.iter())
        .take(NOTE_ITEMS)
        .collect();
    if items.is_empty() {
        if !result.summary.is_empty() {
            note.push_str(&format!(" {}", result.summary));
        }
    } else {
        for item in items {
            note.push_str(&format!("\n- {item}"));
        }
    }
    note
}

/// Objective for a corrective retry.
pub fn retry_objective(objective: &str, result: &VerificationResult) -> String {
    let issues = if result.critical_issues.is_empty() {
        format!("Pontuação baixa na verificação: {}/100", result.score)
    } else {
        result.critical_issues.join("\n")
    };
    format!("{objective}\n\nPROBLEMAS IDENTIFICADOS NA VERIFICAÇÃO:\n{issues}\n\nCORRIJA estes problemas.")
}

/// Condensed description of a run for the grader.
pub fn summarize_run(state: &AgentState) -> String {
    let succeeded = state.successful_actions().count();
    let mut lines = vec![format!(
        "Iterações: {} | Ações: {} ({succeeded} sucesso, {} falhas)",
        state.iteration,
        state.actions.len(),
        state.actions.len() - succeeded
    )];
    for action in &state.actions {
        let detail = if action.success {
            action.message().unwrap_or("concluído").to_string()
        } else {
            action.error.clone().unwrap_or_else(|| "falhou".into())
        };
        let mark = if action.success { "✓" } else { "✗" };
        lines.push(format!("- {} {mark}: {detail}", action.capability));
    }
    if let Some(last) = state.thoughts.last().filter(|t| !t.reasoning.is_empty()) {
        let excerpt: String = last.reasoning.chars().take(REASONING_EXCERPT_CHARS).collect();
        lines.push(format!("Último raciocínio: {excerpt}"));
    }
    lines.join("\n")
}

/// Model-backed grader.
pub struct Verifier {
    reasoner: Arc<dyn Reasoner>,
    retry_score_threshold: u8,
    fallback_score: u8,
}

impl Verifier {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            reasoner,
            retry_score_threshold: RETRY_SCORE_THRESHOLD,
            fallback_score: FALLBACK_SCORE,
        }
    }

    pub fn from_config(reasoner: Arc<dyn Reasoner>, config: &VerifierConfig) -> Self {
        Self {
            reasoner,
            retry_score_threshold: config.retry_score_threshold,
            fallback_score: config.fallback_score,
        }
    }

    /// Like [`should_retry`], with the configured score threshold.
    pub fn should_retry(&self, result: &VerificationResult) -> bool {
        !result.critical_issues.is_empty() || result.score < self.retry_score_threshold
    }

    /// Grade `state` against `objective`. Never fails.
    pub async fn verify(&self, state: &AgentState, objective: &str) -> VerificationResult {
        let prompt = prompts::verification_prompt(objective, &summarize_run(state));
        let outcome = self.reasoner.reason(&prompt).await;

        let Some(text) = outcome.text() else {
            warn!(
                session_id = %state.session_id,
                errors = ?outcome.errors,
                "Verification call failed, approving with fallback score"
            );
            return VerificationResult::fallback(self.fallback_score);
        };

        let raw = match decode_lenient::<RawVerification, _>(text, RawVerification::default) {
            LenientDecode::Parsed(raw) if raw.score.is_some() => raw,
            LenientDecode::Parsed(_) | LenientDecode::Fallback { .. } => {
                warn!(session_id = %state.session_id, "Unparseable verification, approving with fallback score");
                return VerificationResult::fallback(self.fallback_score);
            }
        };

        let result = self.grade(raw);
        info!(
            session_id = %state.session_id,
            score = result.score,
            approved = result.approved,
            critical = result.critical_issues.len(),
            "Verification finished"
        );
        result
    }

    fn grade(&self, raw: RawVerification) -> VerificationResult {
        let score = raw.score.unwrap_or(f64::from(self.fallback_score)).clamp(0.0, 100.0).round() as u8;

        let mut critical_issues = raw.critical_issues;
        critical_issues.retain(|issue| !issue.trim().is_empty());
        for check in &raw.checks {
            if !check.passed && check.severity == Severity::Critical {
                let issue = match (check.criterion.is_empty(), check.note.is_empty()) {
                    (_, true) => check.criterion.clone(),
                    (true, false) => check.note.clone(),
                    (false, false) => format!("{}: {}", check.criterion, check.note),
                };
                if issue.trim().is_empty() {
                    continue;
                }
                if !critical_issues.contains(&issue) {
                    critical_issues.push(issue);
                }
            }
        }

        VerificationResult {
            approved: critical_issues.is_empty() && score >= self.retry_score_threshold,
            score,
            checks: raw.checks,
            suggestions: raw.suggestions,
            critical_issues,
            summary: raw.summary,
            fallback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Action, Thought};
    use crate::test_helpers::ScriptedReasoner;
    use chrono::Utc;
    use mentor_core::CapabilityOutcome;
    use serde_json::json;
    use std::time::Duration;

    fn result(score: u8, critical: &[&str]) -> VerificationResult {
        VerificationResult {
            approved: critical.is_empty() && score >= 40,
            score,
            checks: Vec::new(),
            suggestions: Vec::new(),
            critical_issues: critical.iter().map(|s| s.to_string()).collect(),
            summary: "ok".into(),
            fallback: false,
        }
    }

    fn state() -> AgentState {
        let mut state = AgentState::new("s", "u", "crie um quiz", 10, Duration::from_secs(60));
        state.iteration = 2;
        state.thoughts.push(Thought::parse(2, r#"{"reasoning":"tudo pronto","done":true}"#));
        state.actions.push(Action::from_outcome(
            1,
            "create_activity",
            json!({}),
            Utc::now(),
            CapabilityOutcome::ok("1 atividade criada", json!({})),
        ));
        state.actions.push(Action::rejected(1, "enviar_email", json!({}), "não existe"));
        state
    }

    #[test]
    fn retry_rule() {
        assert!(!should_retry(&result(40, &[])));
        assert!(should_retry(&result(39, &[])));
        assert!(should_retry(&result(95, &["nenhuma atividade salva"])));
        assert!(!should_retry(&result(100, &[])));
    }

    #[test]
    fn user_note_rules() {
        assert_eq!(format_for_user(&result(85, &[])), "");

        let low = result(55, &[]);
        assert_eq!(format_for_user(&low), "Observação de qualidade (55/100): ok");

        let mut issues = result(30, &["a", "b"]);
        issues.suggestions = vec!["c".into(), "d".into()];
        assert_eq!(
            format_for_user(&issues),
            "Observação de qualidade (30/100):\n- a\n- b\n- c"
        );
    }

    #[test]
    fn run_summary_lists_actions_and_last_reasoning() {
        let summary = summarize_run(&state());
        assert!(summary.starts_with("Iterações: 2 | Ações: 2 (1 sucesso, 1 falhas)"));
        assert!(summary.contains("- create_activity ✓: 1 atividade criada"));
        assert!(summary.contains("- enviar_email ✗: não existe"));
        assert!(summary.ends_with("Último raciocínio: tudo pronto"));
    }

    #[test]
    fn retry_objective_lists_issues() {
        let objective = retry_objective("crie um quiz", &result(20, &["faltou salvar"]));
        assert!(objective.starts_with("crie um quiz\n\nPROBLEMAS IDENTIFICADOS"));
        assert!(objective.contains("faltou salvar"));
    }

    #[tokio::test]
    async fn parses_grading_with_portuguese_keys() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"Aqui está: {"pontuacao": 82, "verificacoes": [{"criterio": "completeness", "aprovado": true, "severidade": "baixa"}], "sugestoes": ["incluir gabarito"], "problemas_criticos": [], "resumo": "Bom trabalho"}"#,
        ]));
        let verifier = Verifier::new(reasoner);

        let result = verifier.verify(&state(), "crie um quiz").await;
        assert!(result.approved);
        assert!(!result.fallback);
        assert_eq!(result.score, 82);
        assert_eq!(result.checks[0].criterion, "completeness");
        assert_eq!(result.suggestions, vec!["incluir gabarito"]);
        assert_eq!(result.summary, "Bom trabalho");
    }

    #[tokio::test]
    async fn failed_critical_check_becomes_an_issue() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 75, "checks": [{"criterion": "integrity", "passed": false, "severity": "critical", "note": "atividades não salvas"}], "critical_issues": [], "summary": "x"}"#,
        ]));
        let verifier = Verifier::new(reasoner);

        let result = verifier.verify(&state(), "x").await;
        assert!(!result.approved);
        assert_eq!(result.critical_issues, vec!["integrity: atividades não salvas"]);
        assert!(verifier.should_retry(&result));
    }

    #[tokio::test]
    async fn check_without_criterion_still_grades() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 35, "checks": [{"passed": true}, {"passed": false, "severity": "critical", "note": "nenhuma atividade salva"}], "summary": "incompleto"}"#,
        ]));
        let verifier = Verifier::new(reasoner);

        let result = verifier.verify(&state(), "x").await;
        assert!(!result.fallback);
        assert!(!result.approved);
        assert_eq!(result.score, 35);
        assert_eq!(result.checks.len(), 2);
        assert!(result.checks[0].criterion.is_empty());
        assert_eq!(result.critical_issues, vec!["nenhuma atividade salva"]);
    }

    #[tokio::test]
    async fn grading_failure_falls_back_to_approval() {
        let verifier = Verifier::new(Arc::new(ScriptedReasoner::new(vec![])));
        let result = verifier.verify(&state(), "x").await;
        assert!(result.approved);
        assert!(result.fallback);
        assert_eq!(result.score, 70);

        let verifier = Verifier::new(Arc::new(ScriptedReasoner::new(vec!["sem json"])));
        assert!(verifier.verify(&state(), "x").await.fallback);
    }

    #[tokio::test]
    async fn scores_are_clamped() {
        let verifier = Verifier::new(Arc::new(ScriptedReasoner::new(vec![r#"{"score": 140}"#])));
        assert_eq!(verifier.verify(&state(), "x").await.score, 100);
    }
}
