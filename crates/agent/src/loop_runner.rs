//! The think → act → observe loop.
//!
//! Each iteration asks the reasoner for a [`Thought`], dispatches the
//! proposed capability call (or parallel batch), and records a
//! deterministic [`Observation`]. The loop stops when the model signals
//! done, when the last `stuck_threshold` actions share one capability name,
//! when the timeout elapses, when the iteration cap is reached, or when a
//! reasoning call fails. It never returns an error: the caller always gets
//! the state accumulated so far.

use chrono::Utc;
use mentor_config::AgentConfig;
use mentor_core::capability::{CapabilityOutcome, ExecutionContext};
use mentor_core::event::{EventBus, ProgressUpdate};
use mentor_core::provider::Reasoner;
use mentor_core::validator::NameValidation;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::executor::{ParallelExecutor, ParallelTask, dependencies_of};
use crate::prompts;
use crate::state::{Action, AgentState, AgentStatus, ExitReason, Observation, Thought};

/// Budget of one loop run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub timeout: Duration,
    /// Identical consecutive capability names that count as stuck.
    pub stuck_threshold: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout: Duration::from_secs(120),
            stuck_threshold: 3,
        }
    }
}

impl From<&AgentConfig> for LoopSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            timeout: Duration::from_millis(config.timeout_ms),
            stuck_threshold: config.stuck_threshold,
        }
    }
}

/// The agent loop over one reasoner and one capability registry.
pub struct AgentLoop {
    /// Reasoning collaborator
    reasoner: Arc<dyn Reasoner>,

    /// Runs capability calls, alone or in parallel
    executor: ParallelExecutor,

    settings: LoopSettings,

    /// Progress observers
    events: Option<Arc<EventBus>>,

    /// Capability catalog rendered once for every think prompt
    catalog: String,
}

impl AgentLoop {
    pub fn new(reasoner: Arc<dyn Reasoner>, executor: ParallelExecutor) -> Self {
        let catalog = prompts::capability_catalog(executor.registry());
        Self {
            reasoner,
            executor,
            settings: LoopSettings::default(),
            events: None,
            catalog,
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    /// Run the loop for `objective` with a fresh state.
    pub async fn run(
        &self,
        objective: &str,
        session_id: &str,
        user_id: &str,
        context: &str,
    ) -> AgentState {
        self.run_with(objective, session_id, user_id, context, self.settings, HashMap::new())
            .await
    }

    /// Run the loop with explicit settings, seeding the result cache with
    /// outcomes from an earlier run.
    pub async fn run_with(
        &self,
        objective: &str,
        session_id: &str,
        user_id: &str,
        context: &str,
        settings: LoopSettings,
        seed: HashMap<String, CapabilityOutcome>,
    ) -> AgentState {
        let mut state = AgentState::new(
            session_id,
            user_id,
            objective,
            settings.max_iterations,
            settings.timeout,
        );
        state.result_cache = seed;

        info!(
            session_id = %session_id,
            max_iterations = settings.max_iterations,
            objective = %preview(objective, 80),
            "Starting agent loop"
        );

        loop {
            if state.is_stuck(settings.stuck_threshold) {
                warn!(
                    session_id = %session_id,
                    iteration = state.iteration,
                    "Agent loop stuck on a repeated capability"
                );
                state.finish(ExitReason::Stuck);
                break;
            }
            if state.is_timed_out() {
                warn!(
                    session_id = %session_id,
                    iteration = state.iteration,
                    elapsed_ms = state.elapsed().as_millis() as u64,
                    "Agent loop timed out"
                );
                state.finish(ExitReason::Timeout);
                break;
            }
            if state.iteration >= state.max_iterations {
                warn!(session_id = %session_id, "Agent loop reached the iteration cap");
                state.finish(ExitReason::IterationCap);
                break;
            }

            state.iteration += 1;
            state.status = AgentStatus::Thinking;
            self.progress(
                &state,
                format!("Iteração {}: analisando próximo passo...", state.iteration),
            );

            let prompt = prompts::think_prompt(&state, &self.catalog, context);
            state.reasoning_calls += 1;
            let outcome = self.reasoner.reason(&prompt).await;
            let Some(text) = outcome.text() else {
                error!(
                    session_id = %session_id,
                    iteration = state.iteration,
                    errors = ?outcome.errors,
                    "Reasoning call failed, ending loop"
                );
                state.finish(ExitReason::ReasoningFailed);
                break;
            };

            let thought = Thought::parse(state.iteration, text);
            debug!(
                iteration = state.iteration,
                next_action = ?thought.next_action,
                parallel = thought.parallel_actions.len(),
                done = thought.is_done,
                "Thought"
            );
            state.thoughts.push(thought.clone());

            if thought.is_done {
                info!(session_id = %session_id, iteration = state.iteration, "Agent signaled done");
                state.finish(ExitReason::Completed);
                break;
            }

            state.status = AgentStatus::Acting;
            let actions = self.act(&state, &thought).await;
            for action in &actions {
                if action.success
                    && let Some(result) = &action.result
                {
                    state
                        .result_cache
                        .insert(action.capability.clone(), result.clone());
                }
            }

            state.status = AgentStatus::Observing;
            let observation = Observation::from_actions(state.iteration, &actions);
            debug!(iteration = state.iteration, summary = %observation.summary, "Observation");
            state.actions.extend(actions);
            state.observations.push(observation);
        }

        let succeeded = state.successful_actions().count();
        info!(
            session_id = %session_id,
            iterations = state.iteration,
            actions = state.actions.len(),
            succeeded,
            exit_reason = ?state.exit_reason,
            elapsed_ms = state.elapsed().as_millis() as u64,
            "Agent loop finished"
        );
        state
    }

    async fn act(&self, state: &AgentState, thought: &Thought) -> Vec<Action> {
        let ctx = ExecutionContext {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            previous_results: state.result_cache.clone(),
        };

        let proposed: Vec<(String, serde_json::Value)> = if thought.is_parallel() {
            thought
                .parallel_actions
                .iter()
                .map(|p| (p.action.clone(), p.params.clone()))
                .collect()
        } else if let Some(name) = &thought.next_action {
            vec![(name.clone(), thought.params.clone())]
        } else {
            return Vec::new();
        };

        if proposed.len() > 1 {
            self.progress(state, format!("Executando {} ações em paralelo...", proposed.len()));
        }

        let mut actions = Vec::new();
        let mut tasks = Vec::new();
        for (index, (name, params)) in proposed.into_iter().enumerate() {
            match self.resolve(&name) {
                Ok(canonical) => {
                    if tasks.is_empty() {
                        self.progress(state, format!("Executando: {canonical}..."));
                    }
                    tasks.push(ParallelTask {
                        id: format!("iter-{}-{}", state.iteration, index + 1),
                        dependencies: dependencies_of(&canonical)
                            .iter()
                            .map(|d| d.to_string())
                            .collect(),
                        capability: canonical,
                        params,
                        priority: index as u32,
                    });
                }
                Err(reason) => {
                    warn!(
                        iteration = state.iteration,
                        capability = %name,
                        "Rejected unknown capability"
                    );
                    actions.push(Action::rejected(state.iteration, name, params, reason));
                }
            }
        }

        let started = Utc::now();
        let results = self.executor.execute_parallel_layer(&tasks, &ctx).await;
        debug!(
            iteration = state.iteration,
            tasks = results.len(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Executed capability calls"
        );
        actions.extend(results.into_iter().map(|r| r.into_action(state.iteration)));
        actions
    }

    /// Canonical name for a proposed capability. Only exact names and
    /// known aliases run; anything else is reported back to the model.
    fn resolve(&self, name: &str) -> Result<String, String> {
        match self.executor.registry().validate(name) {
            NameValidation::Exact(canonical) => Ok(canonical),
            NameValidation::Alias { original, canonical } => {
                debug!(original = %original, canonical = %canonical, "Resolved capability alias");
                Ok(canonical)
            }
            NameValidation::Fuzzy {
                original,
                suggestion,
                ..
            } => Err(format!(
                "Capability \"{original}\" não encontrada. Você quis dizer \"{suggestion}\"?"
            )),
            NameValidation::Invalid { reason, .. } => Err(reason),
        }
    }

    fn progress(&self, state: &AgentState, description: String) {
        if let Some(events) = &self.events {
            events.publish(
                ProgressUpdate::running(state.session_id.clone(), description)
                    .with_step(state.iteration),
            );
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedReasoner;
    use mentor_capabilities::{ActivityStore, default_registry};

    fn agent(reasoner: Arc<ScriptedReasoner>) -> (AgentLoop, ActivityStore) {
        let store = ActivityStore::new();
        let executor = ParallelExecutor::new(Arc::new(default_registry(store.clone())));
        (AgentLoop::new(reasoner, executor), store)
    }

    #[tokio::test]
    async fn done_at_iteration_three() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"reasoning":"pesquisar","parallel_actions":[{"action":"search_activity_catalog","params":{"subject":"matemática"}},{"action":"search_account_activities"}]}"#,
            r#"{"reasoning":"decidir","action":"decide_activities","params":{"context":"uma atividade de matemática"}}"#,
            r#"{"reasoning":"pronto","done":true}"#,
        ]));
        let (agent, _) = agent(reasoner.clone());

        let state = agent.run("crie uma atividade", "s1", "u1", "").await;

        assert_eq!(state.iteration, 3);
        assert_eq!(state.exit_reason, Some(ExitReason::Completed));
        assert_eq!(state.status, AgentStatus::Done);
        let iterations: Vec<u32> = state.thoughts.iter().map(|t| t.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(state.actions.len(), 3);
        assert!(state.actions.iter().all(|a| a.success));
        assert_eq!(state.observations.len(), 2);
        assert_eq!(state.parallel_executions(), 1);
        assert_eq!(reasoner.calls(), 3);
        assert_eq!(state.reasoning_calls, 3);
    }

    #[tokio::test]
    async fn repeated_capability_is_stuck() {
        let reasoner = Arc::new(ScriptedReasoner::repeating(
            r#"{"reasoning":"de novo","action":"search_account_activities"}"#,
        ));
        let (agent, _) = agent(reasoner);

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.exit_reason, Some(ExitReason::Stuck));
        assert_eq!(state.status, AgentStatus::Stuck);
        assert_eq!(state.iteration, 3);
        assert_eq!(state.actions.len(), 3);
    }

    #[tokio::test]
    async fn reasoning_failure_ends_with_error() {
        let reasoner = Arc::new(
            ScriptedReasoner::new(vec![r#"{"action":"search_activity_catalog"}"#]).then_fail(),
        );
        let (agent, _) = agent(reasoner.clone());

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.exit_reason, Some(ExitReason::ReasoningFailed));
        assert_eq!(state.status, AgentStatus::Error);
        assert_eq!(state.actions.len(), 1);
        assert_eq!(state.thoughts.len(), 1);
        assert_eq!(state.reasoning_calls, 2);
        assert_eq!(reasoner.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_output_continues_without_action() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "não sei o que fazer",
            r#"{"done":true}"#,
        ]));
        let (agent, _) = agent(reasoner);

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.exit_reason, Some(ExitReason::Completed));
        assert!(state.actions.is_empty());
        assert_eq!(state.observations[0].summary, "Sem ações executadas nesta iteração");
    }

    #[tokio::test]
    async fn unknown_capability_is_a_recorded_failure() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"parallel_actions":[{"action":"enviar_email"},{"action":"pesquisar_atividades_disponiveis"}]}"#,
            r#"{"done":true}"#,
        ]));
        let (agent, _) = agent(reasoner);

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.actions.len(), 2);
        let rejected = state.actions.iter().find(|a| a.capability == "enviar_email").unwrap();
        assert!(!rejected.success);
        assert!(rejected.error.is_some());
        let alias = state
            .actions
            .iter()
            .find(|a| a.capability == "search_activity_catalog")
            .unwrap();
        assert!(alias.success);
    }

    #[tokio::test]
    async fn iteration_cap_is_respected() {
        let reasoner = Arc::new(ScriptedReasoner::repeating(r#"{"reasoning":"hmm"}"#));
        let (agent, _) = agent(reasoner);
        let agent = agent.with_settings(LoopSettings {
            max_iterations: 4,
            ..LoopSettings::default()
        });

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.exit_reason, Some(ExitReason::IterationCap));
        assert_eq!(state.iteration, 4);
        assert_eq!(state.thoughts.len(), 4);
    }

    #[tokio::test]
    async fn zero_timeout_stops_before_thinking() {
        let reasoner = Arc::new(ScriptedReasoner::repeating(r#"{"done":true}"#));
        let (agent, _) = agent(reasoner.clone());
        let agent = agent.with_settings(LoopSettings {
            timeout: Duration::ZERO,
            ..LoopSettings::default()
        });

        let state = agent.run("x", "s1", "u1", "").await;

        assert_eq!(state.exit_reason, Some(ExitReason::Timeout));
        assert_eq!(state.iteration, 0);
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn results_flow_between_iterations() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"action":"search_activity_catalog","params":{"subject":"história","grade":"6º ano"}}"#,
            r#"{"action":"decide_activities","params":{"context":"uma atividade"}}"#,
            r#"{"action":"create_activity"}"#,
            r#"{"action":"save_activities"}"#,
            r#"{"done":true}"#,
        ]));
        let (agent, store) = agent(reasoner);

        let state = agent.run("x", "s1", "prof", "").await;

        assert!(state.actions.iter().all(|a| a.success), "{:?}", state.actions);
        assert_eq!(store.account("prof").await.len(), 1);
        assert_eq!(state.activities_created().len(), 1);
    }

    #[tokio::test]
    async fn progress_events_carry_the_iteration() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![r#"{"done":true}"#]));
        let (agent, _) = agent(reasoner);
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let agent = agent.with_events(bus);

        agent.run("x", "s1", "u1", "").await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.current_step, Some(1));
        assert_eq!(update.session_id, "s1");
    }
}
