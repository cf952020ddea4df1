//! Agent run state: thoughts, actions and observations.
//!
//! An [`AgentState`] is created per loop run and owned exclusively by it.
//! Every iteration appends one [`Thought`]; unless the thought signals
//! done, it also appends zero or more [`Action`]s and one [`Observation`]
//! derived from them.

use chrono::{DateTime, Utc};
use mentor_core::capability::CapabilityOutcome;
use mentor_core::json::{LenientDecode, decode_lenient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Thinking,
    Acting,
    Observing,
    Done,
    Error,
    Stuck,
}

/// Why a loop run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The model signaled done.
    Completed,
    Timeout,
    IterationCap,
    Stuck,
    ReasoningFailed,
}

impl ExitReason {
    /// Final status for a run that stopped for this reason.
    pub fn status(self) -> AgentStatus {
        match self {
            Self::Completed | Self::Timeout | Self::IterationCap => AgentStatus::Done,
            Self::Stuck => AgentStatus::Stuck,
            Self::ReasoningFailed => AgentStatus::Error,
        }
    }
}

/// A capability call proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(alias = "acao", alias = "capability")]
    pub action: String,

    #[serde(default, alias = "parametros")]
    pub params: serde_json::Value,
}

/// One reasoning step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    /// 1-based loop iteration.
    pub iteration: u32,
    pub reasoning: String,
    pub next_action: Option<String>,
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_actions: Vec<ProposedAction>,
    pub is_done: bool,
    pub timestamp: DateTime<Utc>,
}

/// Wire shape of a thought, as the model writes it.
#[derive(Debug, Default, Deserialize)]
struct RawThought {
    #[serde(default, alias = "pensamento")]
    reasoning: Option<String>,
    #[serde(default, alias = "acao")]
    action: Option<String>,
    #[serde(default, alias = "parametros")]
    params: Option<serde_json::Value>,
    #[serde(default, alias = "acoes_paralelas")]
    parallel_actions: Option<Vec<ProposedAction>>,
    #[serde(default)]
    done: Option<bool>,
}

impl Thought {
    /// Parse model output into a thought.
    ///
    /// Unparseable output becomes a thought whose reasoning is the raw
    /// text, with no action and `is_done = false`.
    pub fn parse(iteration: u32, text: &str) -> Self {
        let now = Utc::now();
        match decode_lenient::<RawThought, _>(text, RawThought::default) {
            LenientDecode::Parsed(raw) => Self {
                iteration,
                reasoning: raw.reasoning.unwrap_or_default(),
                next_action: raw
                    .action
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty() && a != "null"),
                params: raw
                    .params
                    .filter(|p| !p.is_null())
                    .unwrap_or_else(|| serde_json::json!({})),
                parallel_actions: raw.parallel_actions.unwrap_or_default(),
                is_done: raw.done.unwrap_or(false),
                timestamp: now,
            },
            LenientDecode::Fallback { reason, .. } => {
                tracing::warn!(iteration, reason = %reason, "Unparseable thought, continuing without action");
                Self {
                    iteration,
                    reasoning: text.trim().to_string(),
                    next_action: None,
                    params: serde_json::json!({}),
                    parallel_actions: Vec::new(),
                    is_done: false,
                    timestamp: now,
                }
            }
        }
    }

    pub fn is_parallel(&self) -> bool {
        !self.parallel_actions.is_empty()
    }
}

/// One capability invocation, including each member of a parallel batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub iteration: u32,
    pub capability: String,
    pub params: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CapabilityOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    /// Record a finished invocation from its outcome.
    pub fn from_outcome(
        iteration: u32,
        capability: impl Into<String>,
        params: serde_json::Value,
        started_at: DateTime<Utc>,
        outcome: CapabilityOutcome,
    ) -> Self {
        Self {
            iteration,
            capability: capability.into(),
            params,
            started_at,
            finished_at: Utc::now(),
            success: outcome.success,
            error: outcome.error.clone(),
            result: Some(outcome),
        }
    }

    /// Record an invocation that never reached a capability.
    pub fn rejected(
        iteration: u32,
        capability: impl Into<String>,
        params: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            iteration,
            capability: capability.into(),
            params,
            started_at: now,
            finished_at: now,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }

    /// The outcome's message, when there is one.
    pub fn message(&self) -> Option<&str> {
        self.result
            .as_ref()
            .map(|r| r.message.as_str())
            .filter(|m| !m.is_empty())
    }
}

/// Deterministic summary of one iteration's actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub iteration: u32,
    pub summary: String,
    pub data_discovered: Vec<String>,
    pub decisions_needed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn from_actions(iteration: u32, actions: &[Action]) -> Self {
        let succeeded = actions.iter().filter(|a| a.success).count();
        let failed = actions.len() - succeeded;

        let data_discovered = actions
            .iter()
            .filter(|a| a.success)
            .map(|a| format!("{}: {}", a.capability, a.message().unwrap_or("dados obtidos")))
            .collect();

        let mut parts = Vec::new();
        if succeeded > 0 {
            parts.push(format!("{succeeded} ação(ões) concluída(s) com sucesso"));
        }
        if failed > 0 {
            parts.push(format!("{failed} ação(ões) falharam"));
        }
        let summary = if parts.is_empty() {
            "Sem ações executadas nesta iteração".to_string()
        } else {
            parts.join(". ")
        };

        let decisions_needed = if failed > 0 {
            vec!["Decidir como lidar com falhas".to_string()]
        } else {
            Vec::new()
        };

        Self {
            iteration,
            summary,
            data_discovered,
            decisions_needed,
            timestamp: Utc::now(),
        }
    }
}

/// Everything one loop run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub session_id: String,
    pub user_id: String,
    pub objective: String,

    /// Iterations started so far (1-based once running).
    pub iteration: u32,
    pub max_iterations: u32,

    /// Reasoning calls made by the run, failed ones included.
    pub reasoning_calls: u32,
    pub status: AgentStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,

    pub thoughts: Vec<Thought>,
    pub actions: Vec<Action>,
    pub observations: Vec<Observation>,

    /// Latest successful outcome per capability, fed to later calls.
    #[serde(skip)]
    pub result_cache: HashMap<String, CapabilityOutcome>,

    #[serde(skip)]
    pub started: Instant,
    pub timeout: Duration,
}

impl AgentState {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        objective: impl Into<String>,
        max_iterations: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            objective: objective.into(),
            iteration: 0,
            max_iterations,
            reasoning_calls: 0,
            status: AgentStatus::Thinking,
            exit_reason: None,
            thoughts: Vec::new(),
            actions: Vec::new(),
            observations: Vec::new(),
            result_cache: HashMap::new(),
            started: Instant::now(),
            timeout,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_timed_out(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// True when the last `threshold` actions all invoked one capability.
    pub fn is_stuck(&self, threshold: usize) -> bool {
        if threshold == 0 || self.actions.len() < threshold {
            return false;
        }
        let recent = &self.actions[self.actions.len() - threshold..];
        recent.iter().all(|a| a.capability == recent[0].capability)
    }

    pub fn finish(&mut self, reason: ExitReason) {
        self.exit_reason = Some(reason);
        self.status = reason.status();
    }

    pub fn successful_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.success)
    }

    /// Distinct capability names, in first-use order.
    pub fn capabilities_used(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.actions
            .iter()
            .filter(|a| seen.insert(a.capability.as_str()))
            .map(|a| a.capability.clone())
            .collect()
    }

    /// Iterations whose thought proposed a parallel batch.
    pub fn parallel_executions(&self) -> usize {
        self.thoughts.iter().filter(|t| t.is_parallel()).count()
    }

    /// Ids of activities created during the run, first occurrence order.
    pub fn activities_created(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.successful_actions()
            .filter_map(|a| a.result.as_ref())
            .filter_map(|r| r.data.get("activities_created"))
            .filter_map(|v| v.as_array())
            .flatten()
            .filter_map(|v| v.as_str())
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    /// Append another run's history (a verifier retry) to this one.
    ///
    /// The other run's iterations are numbered after this run's, and its
    /// budget and reasoning calls are added to this run's.
    pub fn absorb(&mut self, other: AgentState) {
        let offset = self.iteration;
        self.thoughts.extend(other.thoughts.into_iter().map(|mut t| {
            t.iteration += offset;
            t
        }));
        self.actions.extend(other.actions.into_iter().map(|mut a| {
            a.iteration += offset;
            a
        }));
        self.observations
            .extend(other.observations.into_iter().map(|mut o| {
                o.iteration += offset;
                o
            }));
        self.result_cache.extend(other.result_cache);
        self.iteration += other.iteration;
        self.max_iterations += other.max_iterations;
        self.reasoning_calls += other.reasoning_calls;
    }

    /// Plain-text run summary, stored as the session summary.
    pub fn summary(&self) -> String {
        let succeeded = self.successful_actions().count();
        let failed = self.actions.len() - succeeded;
        let capabilities: Vec<String> = {
            let mut seen = BTreeSet::new();
            self.successful_actions()
                .filter(|a| seen.insert(a.capability.as_str()))
                .map(|a| a.capability.clone())
                .collect()
        };
        let status = serde_json::to_value(self.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        format!(
            "Loop concluído em {} iterações ({}ms).\n{succeeded} ações executadas com sucesso, {failed} falhas.\nStatus final: {status}.\nCapabilities executadas: {}.",
            self.iteration,
            self.elapsed().as_millis(),
            capabilities.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(name: &str, success: bool) -> Action {
        let outcome = if success {
            CapabilityOutcome::ok("ok", json!({}))
        } else {
            CapabilityOutcome::failure("boom")
        };
        Action::from_outcome(1, name, json!({}), Utc::now(), outcome)
    }

    #[test]
    fn parse_english_thought() {
        let thought = Thought::parse(
            2,
            r#"{"reasoning":"buscar catálogo","action":"search_activity_catalog","params":{"subject":"matemática"},"done":false}"#,
        );
        assert_eq!(thought.iteration, 2);
        assert_eq!(thought.next_action.as_deref(), Some("search_activity_catalog"));
        assert_eq!(thought.params["subject"], "matemática");
        assert!(!thought.is_done);
    }

    #[test]
    fn parse_portuguese_keys_and_parallel_batch() {
        let thought = Thought::parse(
            1,
            "```json\n{\"pensamento\":\"pesquisar\",\"acao\":null,\"acoes_paralelas\":[{\"acao\":\"pesquisar_atividades_disponiveis\",\"parametros\":{}},{\"acao\":\"pesquisar_atividades_conta\"}],\"done\":false}\n```",
        );
        assert_eq!(thought.reasoning, "pesquisar");
        assert!(thought.next_action.is_none());
        assert_eq!(thought.parallel_actions.len(), 2);
        assert_eq!(thought.parallel_actions[1].action, "pesquisar_atividades_conta");
        assert!(thought.parallel_actions[1].params.is_null());
    }

    #[test]
    fn malformed_output_is_no_action_not_done() {
        let thought = Thought::parse(1, "vou pensar um pouco mais");
        assert_eq!(thought.reasoning, "vou pensar um pouco mais");
        assert!(thought.next_action.is_none());
        assert!(!thought.is_done);
    }

    #[test]
    fn observation_counts_successes_and_failures() {
        let actions = vec![action("a", true), action("b", false), action("c", true)];
        let obs = Observation::from_actions(4, &actions);
        assert_eq!(obs.summary, "2 ação(ões) concluída(s) com sucesso. 1 ação(ões) falharam");
        assert_eq!(obs.data_discovered, vec!["a: ok", "c: ok"]);
        assert_eq!(obs.decisions_needed.len(), 1);
    }

    #[test]
    fn observation_without_actions() {
        let obs = Observation::from_actions(1, &[]);
        assert_eq!(obs.summary, "Sem ações executadas nesta iteração");
        assert!(obs.decisions_needed.is_empty());
    }

    #[tokio::test]
    async fn stuck_when_last_actions_share_a_name() {
        let mut state = AgentState::new("s", "u", "x", 10, Duration::from_secs(60));
        state.actions.push(action("a", true));
        state.actions.push(action("b", true));
        state.actions.push(action("b", true));
        assert!(!state.is_stuck(3));

        state.actions.push(action("b", false));
        assert!(state.is_stuck(3));
        assert!(!state.is_stuck(0));
    }

    #[tokio::test]
    async fn activities_created_collects_ids() {
        let mut state = AgentState::new("s", "u", "x", 10, Duration::from_secs(60));
        state.actions.push(Action::from_outcome(
            1,
            "create_activity",
            json!({}),
            Utc::now(),
            CapabilityOutcome::ok("criadas", json!({ "activities_created": ["a1", "a2"] })),
        ));
        assert_eq!(state.activities_created(), vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn activities_created_drops_repeats_anywhere() {
        let mut state = AgentState::new("s", "u", "x", 10, Duration::from_secs(60));
        for ids in [json!(["a1", "a2"]), json!(["a3", "a1"]), json!(["a2"])] {
            state.actions.push(Action::from_outcome(
                1,
                "create_activity",
                json!({}),
                Utc::now(),
                CapabilityOutcome::ok("criadas", json!({ "activities_created": ids })),
            ));
        }
        assert_eq!(state.activities_created(), vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn absorb_numbers_retry_iterations_after_the_original() {
        let mut original = AgentState::new("s", "u", "x", 10, Duration::from_secs(60));
        original.iteration = 2;
        original.reasoning_calls = 2;
        original.thoughts.push(Thought::parse(1, r#"{"action":"a"}"#));
        original.thoughts.push(Thought::parse(2, r#"{"done":true}"#));
        original.actions.push(action("a", true));

        let mut retry = AgentState::new("s", "u", "x", 3, Duration::from_secs(60));
        retry.iteration = 2;
        retry.reasoning_calls = 2;
        retry.thoughts.push(Thought::parse(1, r#"{"action":"b"}"#));
        retry.thoughts.push(Thought::parse(2, r#"{"done":true}"#));
        retry.actions.push(action("b", true));
        retry.observations.push(Observation::from_actions(1, &retry.actions));

        original.absorb(retry);
        assert_eq!(original.iteration, 4);
        assert_eq!(original.max_iterations, 13);
        assert_eq!(original.reasoning_calls, 4);
        let numbers: Vec<u32> = original.thoughts.iter().map(|t| t.iteration).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(original.actions[1].iteration, 3);
        assert_eq!(original.observations[0].iteration, 3);
    }
}
