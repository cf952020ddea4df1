//! Turn orchestration: comprehend, plan, execute, verify, respond.
//!
//! The [`Orchestrator`] owns every collaborator a turn needs. A turn is two
//! calls: [`Orchestrator::comprehend`] interprets the request and builds a
//! [`MacroPlan`] for the teacher to see, and [`Orchestrator::execute`] runs
//! the agent loop toward the plan's objective, grades the result, retries
//! once when grading asks for it, and writes the final response.
//!
//! [`Orchestrator::run_pipeline`] is the offline path: it runs the plan's
//! capability calls through the dependency-layered executor without any
//! reasoning calls.

use chrono::{DateTime, Utc};
use mentor_capabilities::Activity;
use mentor_capabilities::decide::{detect_grade, detect_subject};
use mentor_config::{AgentConfig, AppConfig, ContextConfig};
use mentor_core::capability::{CapabilityRegistry, ExecutionContext};
use mentor_core::event::{EventBus, ProgressStatus, ProgressUpdate};
use mentor_core::json::{LenientDecode, decode_lenient, extract_json_object};
use mentor_core::memory::DurableStore;
use mentor_core::provider::Reasoner;
use mentor_core::validator::PlannedCapability;
use mentor_memory::{MemorySettings, PersistentMemory};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::ContextEngine;
use crate::executor::ParallelExecutor;
use crate::loop_runner::{AgentLoop, LoopSettings};
use crate::prompts;
use crate::session::{SessionContext, SessionManager};
use crate::state::{AgentState, ExitReason, Observation};
use crate::verifier::{self, VerificationResult, Verifier};

const INITIAL_RESPONSE_FALLBACK: &str = "Entendi seu pedido! Vou começar a trabalhar nisso agora.";
const INTERPRETATION_FALLBACK: &str = "Criar atividades educacionais";
const INTENT_FALLBACK: &str = "CRIAR_ATIVIDADE";
const FINAL_RESPONSE_FALLBACK: &str =
    "Processo concluído! Suas atividades estão prontas para uso.";

// ── Comprehension ──────────────────────────────────────────────────────

/// Entities the model extracted from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(
        default,
        alias = "quantidade",
        deserialize_with = "lenient_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<u32>,
    #[serde(default, alias = "disciplina", skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, alias = "serie", alias = "série", skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, alias = "tipo_atividade", skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, alias = "tema", skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Models write quantities as numbers or as strings.
fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// The model's reading of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comprehension {
    pub initial_response: String,
    pub interpretation: String,
    pub intent: String,
    pub entities: Entities,
    pub macro_plan: Vec<MacroStep>,
    /// Comprehension failed and these are default values.
    pub fallback: bool,
}

impl Comprehension {
    /// Defaults used when the comprehension call fails or cannot be decoded.
    pub fn fallback(request: &str) -> Self {
        Self {
            initial_response: INITIAL_RESPONSE_FALLBACK.into(),
            interpretation: INTERPRETATION_FALLBACK.into(),
            intent: INTENT_FALLBACK.into(),
            entities: Entities {
                subject: detect_subject(request),
                grade: detect_grade(request),
                ..Entities::default()
            },
            macro_plan: MacroStep::DEFAULT_PLAN.to_vec(),
            fallback: true,
        }
    }

    fn from_raw(raw: RawComprehension, request: &str) -> Self {
        let mut macro_plan: Vec<MacroStep> = Vec::new();
        for step in &raw.macro_plan {
            let name = match step {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => ["step", "etapa", "id"]
                    .iter()
                    .find_map(|k| o.get(*k).and_then(Value::as_str)),
                _ => None,
            };
            match name.and_then(MacroStep::parse) {
                Some(step) if !macro_plan.contains(&step) => macro_plan.push(step),
                Some(_) => {}
                None => warn!(step = %step, "Ignoring unknown macro step"),
            }
        }
        if macro_plan.is_empty() {
            macro_plan = MacroStep::DEFAULT_PLAN.to_vec();
        }

        let mut entities = raw.entities;
        if entities.subject.is_none() {
            entities.subject = detect_subject(request);
        }
        if entities.grade.is_none() {
            entities.grade = detect_grade(request);
        }

        Self {
            initial_response: non_blank(raw.initial_response, INITIAL_RESPONSE_FALLBACK),
            interpretation: non_blank(raw.interpretation, INTERPRETATION_FALLBACK),
            intent: non_blank(raw.intent, INTENT_FALLBACK),
            entities,
            macro_plan,
            fallback: false,
        }
    }
}

/// Wire shape of a comprehension reply.
#[derive(Debug, Default, Deserialize)]
struct RawComprehension {
    #[serde(default, alias = "resposta_inicial", alias = "resposta")]
    initial_response: Option<String>,
    #[serde(default, alias = "interpretacao")]
    interpretation: Option<String>,
    #[serde(default, alias = "intencao")]
    intent: Option<String>,
    #[serde(default, alias = "entidades")]
    entities: Entities,
    #[serde(default, alias = "plano_macro")]
    macro_plan: Vec<Value>,
}

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ── Macro plan ─────────────────────────────────────────────────────────

/// Coarse steps of a plan, each expanding to capability calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroStep {
    #[serde(alias = "pesquisar")]
    Research,
    #[serde(alias = "decidir")]
    Decide,
    #[serde(alias = "criar")]
    Create,
    #[serde(alias = "salvar")]
    Persist,
    #[serde(alias = "arquivo")]
    Document,
}

impl MacroStep {
    pub const DEFAULT_PLAN: [MacroStep; 4] = [
        MacroStep::Research,
        MacroStep::Decide,
        MacroStep::Create,
        MacroStep::Persist,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "research" | "pesquisar" => Some(Self::Research),
            "decide" | "decidir" => Some(Self::Decide),
            "create" | "criar" => Some(Self::Create),
            "persist" | "save" | "salvar" => Some(Self::Persist),
            "document" | "arquivo" | "documento" => Some(Self::Document),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Research => "Pesquisar as melhores opções",
            Self::Decide => "Decidir atividades ideais",
            Self::Create => "Criar atividades personalizadas",
            Self::Persist => "Salvar no banco de dados",
            Self::Document => "Gerar documento complementar",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Research => "Analisando catálogo e atividades anteriores",
            Self::Decide => "Selecionando as melhores atividades",
            Self::Create => "Construindo atividades sob medida",
            Self::Persist => "Persistindo atividades criadas",
            Self::Document => "Criando documento de apoio pedagógico",
        }
    }

    /// Capability calls this step expands to.
    fn calls(self, objective: &str, entities: &Entities) -> Vec<(&'static str, Value)> {
        match self {
            Self::Research => {
                let mut catalog = Map::new();
                insert_opt(&mut catalog, "subject", entities.subject.as_deref());
                insert_opt(&mut catalog, "grade", entities.grade.as_deref());
                vec![
                    ("search_activity_catalog", Value::Object(catalog)),
                    ("search_account_activities", json!({})),
                ]
            }
            Self::Decide => {
                let mut decide = Map::new();
                decide.insert("context".into(), json!(objective));
                if let Some(quantity) = entities.quantity {
                    decide.insert("quantity".into(), json!(quantity));
                }
                insert_opt(&mut decide, "subject", entities.subject.as_deref());
                insert_opt(&mut decide, "grade", entities.grade.as_deref());

                let mut content = Map::new();
                content.insert("context".into(), json!(objective));
                insert_opt(&mut content, "topic", entities.topic.as_deref());
                vec![
                    ("decide_activities", Value::Object(decide)),
                    ("generate_activity_content", Value::Object(content)),
                ]
            }
            Self::Create => vec![("create_activity", json!({ "context": objective }))],
            Self::Persist => vec![("save_activities", json!({}))],
            Self::Document => vec![("create_document", json!({}))],
        }
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key.into(), json!(value));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub step: MacroStep,
    pub title: String,
    pub description: String,
    pub calls: Vec<PlannedCapability>,
}

/// The plan shown to the teacher before execution.
#[derive(Debug, Clone, Serialize)]
pub struct MacroPlan {
    pub plan_id: String,
    pub objective: String,
    pub steps: Vec<PlanStep>,
    /// Name rewrites made while validating the calls.
    pub corrections: Vec<String>,
    /// Calls dropped by validation.
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MacroPlan {
    /// Expand `steps` into validated capability calls.
    pub fn build(
        registry: &CapabilityRegistry,
        objective: &str,
        steps: &[MacroStep],
        entities: &Entities,
    ) -> Self {
        let mut plan = Self {
            plan_id: format!("plan-{}", uuid::Uuid::new_v4()),
            objective: objective.to_string(),
            steps: Vec::new(),
            corrections: Vec::new(),
            errors: Vec::new(),
            created_at: Utc::now(),
        };

        let mut order = 0;
        for &step in steps {
            let planned: Vec<PlannedCapability> = step
                .calls(objective, entities)
                .into_iter()
                .map(|(name, params)| {
                    order += 1;
                    PlannedCapability {
                        id: format!("cap-{order}-{name}"),
                        name: name.to_string(),
                        display_name: String::new(),
                        category: None,
                        params,
                        order,
                    }
                })
                .collect();

            let validation = registry.validate_plan(planned);
            plan.corrections.extend(validation.corrections);
            plan.errors.extend(validation.errors);
            plan.steps.push(PlanStep {
                step,
                title: step.title().to_string(),
                description: step.description().to_string(),
                calls: validation.calls,
            });
        }

        if !plan.errors.is_empty() {
            warn!(plan_id = %plan.plan_id, errors = ?plan.errors, "Plan calls dropped by validation");
        }
        plan
    }

    /// Every call in plan order as `(name, params)`.
    pub fn capabilities(&self) -> Vec<(String, Value)> {
        self.steps
            .iter()
            .flat_map(|s| s.calls.iter())
            .map(|c| (c.name.clone(), c.params.clone()))
            .collect()
    }

    /// Numbered step list for prompts and the terminal.
    pub fn outline(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let names: Vec<&str> = s.calls.iter().map(|c| c.name.as_str()).collect();
                format!("{}. {} ({})", i + 1, s.title, names.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Turn report ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnMetrics {
    pub total_duration_ms: u64,
    /// Reasoning calls made for the turn, comprehension and failed calls
    /// included.
    pub ai_calls: u32,
    pub iterations_used: u32,
    pub capabilities_executed: usize,
    pub parallel_executions: usize,
}

/// Everything [`Orchestrator::execute`] hands back.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    /// The plain-text run summary.
    pub report: String,
    pub final_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    pub agent_state: AgentState,
    pub metrics: TurnMetrics,
}

// ── Orchestrator ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TurnSettings {
    agent: AgentConfig,
    context: ContextConfig,
    verifier_enabled: bool,
    session_max_age: Duration,
}

/// Runs turns for any number of sessions.
pub struct Orchestrator {
    reasoner: Arc<dyn Reasoner>,
    registry: Arc<CapabilityRegistry>,
    agent: AgentLoop,
    verifier: Verifier,
    store: Arc<dyn DurableStore>,
    memory_settings: MemorySettings,
    settings: TurnSettings,
    sessions: Mutex<SessionManager>,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn DurableStore>,
        config: &AppConfig,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let agent = AgentLoop::new(reasoner.clone(), ParallelExecutor::new(registry.clone()))
            .with_settings(LoopSettings::from(&config.agent))
            .with_events(events.clone());

        Self {
            verifier: Verifier::from_config(reasoner.clone(), &config.verifier),
            reasoner,
            registry,
            agent,
            store,
            memory_settings: MemorySettings::from(&config.memory),
            settings: TurnSettings {
                agent: config.agent.clone(),
                context: config.context.clone(),
                verifier_enabled: config.verifier.enabled,
                session_max_age: Duration::from_secs(config.session.max_age_minutes * 60),
            },
            sessions: Mutex::new(SessionManager::new()),
            events,
        }
    }

    /// Progress stream for every session this orchestrator runs.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The live session, if any.
    pub async fn session(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.lock().await.get(session_id)
    }

    /// Expire sessions idle for longer than the configured age.
    pub async fn expire_idle_sessions(&self, now: Instant) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .expire_older_than(now, self.settings.session_max_age)
    }

    pub async fn end_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.expire(session_id).is_some()
    }

    /// Interpret `request` and build the plan for it.
    ///
    /// Never fails: a failed or garbled reasoning call yields
    /// [`Comprehension::fallback`] and the default plan.
    pub async fn comprehend(
        &self,
        request: &str,
        session_id: &str,
        user_id: &str,
    ) -> (Comprehension, MacroPlan) {
        let session = self.open_session(session_id, user_id).await;
        self.publish(session_id, "Analisando seu pedido...", None);

        let memory_context = session.memory.get_memory_context().await;
        let prompt = {
            let mut context = session.context.lock().await;
            context.add_user_input(request);
            context.add_memory_context(&memory_context);
            prompts::comprehension_prompt(&context)
        };

        session.count_call();
        let outcome = self.reasoner.reason(&prompt).await;
        let comprehension = match outcome.text() {
            Some(text) => match decode_lenient(text, RawComprehension::default) {
                LenientDecode::Parsed(raw) => Comprehension::from_raw(raw, request),
                LenientDecode::Fallback { reason, .. } => {
                    warn!(session_id, reason = %reason, "Comprehension reply not decodable");
                    Comprehension::fallback(request)
                }
            },
            None => {
                warn!(session_id, errors = ?outcome.errors, "Comprehension call failed");
                Comprehension::fallback(request)
            }
        };

        let plan = MacroPlan::build(
            &self.registry,
            request,
            &comprehension.macro_plan,
            &comprehension.entities,
        );

        let mut metadata = Map::new();
        metadata.insert("intent".into(), json!(comprehension.intent));
        metadata.insert("plan_id".into(), json!(plan.plan_id));
        session
            .memory
            .save_working_memory("pedido", &comprehension.interpretation, metadata)
            .await;

        info!(
            session_id,
            intent = %comprehension.intent,
            steps = plan.steps.len(),
            fallback = comprehension.fallback,
            "Request comprehended"
        );
        (comprehension, plan)
    }

    /// Execute `plan` with the agent loop and produce the final response.
    pub async fn execute(&self, plan: &MacroPlan, session_id: &str, user_id: &str) -> TurnReport {
        let started = Instant::now();
        let session = self.open_session(session_id, user_id).await;
        self.publish(session_id, "Iniciando execução inteligente...", None);

        // comprehension calls made for this turn
        let mut ai_calls = session.take_calls();

        let loop_context = self.loop_context(&session, plan).await;
        let mut state = self
            .agent
            .run(&plan.objective, session_id, user_id, &loop_context)
            .await;
        self.record(&session, &state).await;

        let mut verification = None;
        if self.settings.verifier_enabled && state.successful_actions().count() > 0 {
            self.publish(session_id, "Verificando a qualidade do resultado...", None);
            let mut result = self.verifier.verify(&state, &plan.objective).await;
            ai_calls += 1;

            if self.verifier.should_retry(&result)
                && state.iteration < self.settings.agent.retry_iteration_ceiling
            {
                info!(session_id, score = result.score, "Verification asked for a retry");
                self.publish(session_id, "Ajustando o resultado...", None);
                let loop_context = self.loop_context(&session, plan).await;
                let retry = self
                    .agent
                    .run_with(
                        &verifier::retry_objective(&plan.objective, &result),
                        session_id,
                        user_id,
                        &loop_context,
                        LoopSettings {
                            max_iterations: self.settings.agent.retry_max_iterations,
                            ..self.agent.settings()
                        },
                        state.result_cache.clone(),
                    )
                    .await;
                self.record(&session, &retry).await;
                state.absorb(retry);

                result = self.verifier.verify(&state, &plan.objective).await;
                ai_calls += 1;
            }
            verification = Some(result);
        }

        let mut final_response = self
            .final_response(&session, &state, verification.as_ref())
            .await;
        ai_calls += state.reasoning_calls + 1;
        if let Some(note) = verification
            .as_ref()
            .map(verifier::format_for_user)
            .filter(|n| !n.is_empty())
        {
            final_response.push_str("\n\n");
            final_response.push_str(&note);
        }

        let report = self.close_turn(&session, &state).await;
        let metrics = TurnMetrics {
            total_duration_ms: started.elapsed().as_millis() as u64,
            ai_calls,
            iterations_used: state.iteration,
            capabilities_executed: state.actions.len(),
            parallel_executions: state.parallel_executions(),
        };
        self.publish_completed(session_id, &metrics);

        info!(
            session_id,
            ai_calls,
            iterations = state.iteration,
            score = verification.as_ref().map(|v| v.score),
            duration_ms = metrics.total_duration_ms,
            "Turn finished"
        );
        TurnReport {
            report,
            final_response,
            verification,
            agent_state: state,
            metrics,
        }
    }

    /// Execute `plan` without reasoning calls.
    ///
    /// The plan's calls run through the dependency-layered executor and the
    /// response is built from their results.
    pub async fn run_pipeline(
        &self,
        plan: &MacroPlan,
        session_id: &str,
        user_id: &str,
    ) -> TurnReport {
        let started = Instant::now();
        let session = self.open_session(session_id, user_id).await;
        self.publish(session_id, "Executando o plano...", None);

        let tasks = ParallelExecutor::create_tasks_from_capabilities(&plan.capabilities());
        let execution_plan = ParallelExecutor::build_execution_plan(tasks);
        let mut ctx = ExecutionContext::new(session_id, user_id);
        let pipeline = ParallelExecutor::new(self.registry.clone())
            .execute_full_pipeline(&execution_plan, &mut ctx)
            .await;

        let mut state = AgentState::new(
            session_id,
            user_id,
            &plan.objective,
            execution_plan.layers.len() as u32,
            Duration::from_millis(self.settings.agent.timeout_ms),
        );
        let mut parallel_layers = 0;
        for (index, layer) in pipeline.layers.into_iter().enumerate() {
            let iteration = index as u32 + 1;
            if layer.len() > 1 {
                parallel_layers += 1;
            }
            self.publish_step(session_id, iteration, layer.len());
            let actions: Vec<_> = layer.into_iter().map(|r| r.into_action(iteration)).collect();
            state.observations.push(Observation::from_actions(iteration, &actions));
            state.actions.extend(actions);
            state.iteration = iteration;
        }
        state.result_cache = ctx.previous_results;
        state.finish(ExitReason::Completed);
        self.record(&session, &state).await;

        let final_response = deterministic_response(&state);
        let report = self.close_turn(&session, &state).await;
        let metrics = TurnMetrics {
            total_duration_ms: started.elapsed().as_millis() as u64,
            ai_calls: session.take_calls(),
            iterations_used: state.iteration,
            capabilities_executed: state.actions.len(),
            parallel_executions: parallel_layers,
        };
        self.publish_completed(session_id, &metrics);

        TurnReport {
            report,
            final_response,
            verification: None,
            agent_state: state,
            metrics,
        }
    }

    /// Comprehend then execute in one call.
    pub async fn handle(
        &self,
        request: &str,
        session_id: &str,
        user_id: &str,
    ) -> (Comprehension, TurnReport) {
        let (comprehension, plan) = self.comprehend(request, session_id, user_id).await;
        let report = self.execute(&plan, session_id, user_id).await;
        (comprehension, report)
    }

    /// The live session for `session_id`, created on first use.
    ///
    /// Memory initialization talks to the durable store, so it runs without
    /// holding the session map.
    async fn open_session(&self, session_id: &str, user_id: &str) -> SessionContext {
        {
            let mut sessions = self.sessions.lock().await;
            let expired = sessions.expire_older_than(Instant::now(), self.settings.session_max_age);
            if !expired.is_empty() {
                debug!(expired = ?expired, "Expired idle sessions");
            }
            if sessions.touch(session_id)
                && let Some(session) = sessions.get(session_id)
            {
                return session;
            }
        }

        let memory = PersistentMemory::new(
            user_id,
            session_id,
            self.store.clone(),
            self.memory_settings.clone(),
        );
        if !memory.initialize().await {
            warn!(session_id, "Memory store unavailable, using local cache only");
        }
        let context = ContextEngine::from_config(session_id, &self.settings.context);
        self.sessions
            .lock()
            .await
            .get_or_insert(SessionContext::new(context, Arc::new(memory)))
    }

    /// Context handed to every think prompt of a run: the session's
    /// conversation so far, working memory and the plan.
    async fn loop_context(&self, session: &SessionContext, plan: &MacroPlan) -> String {
        let mut parts = Vec::new();
        let conversation = session.context.lock().await.conversation();
        if !conversation.is_empty() {
            parts.push(conversation);
        }
        let working = session.memory.format_for_prompt().await;
        if !working.is_empty() {
            parts.push(working);
        }
        parts.push(format!("PLANO MACRO:\n{}", plan.outline()));
        parts.join("\n\n")
    }

    /// Feed a run's history to the session's context engine.
    async fn record(&self, session: &SessionContext, state: &AgentState) {
        let mut context = session.context.lock().await;
        for thought in &state.thoughts {
            context.add_thought(thought);
        }
        for action in &state.actions {
            context.add_action(action);
        }
        for observation in &state.observations {
            context.add_observation(observation);
        }
        debug!(
            session_id = %state.session_id,
            tokens = context.total_tokens(),
            compressions = context.compressions(),
            "Context updated"
        );
    }

    async fn final_response(
        &self,
        session: &SessionContext,
        state: &AgentState,
        verification: Option<&VerificationResult>,
    ) -> String {
        let actions: Vec<String> = state
            .successful_actions()
            .map(|a| format!("- {}: {}", a.capability, a.message().unwrap_or("ok")))
            .collect();
        let verification = match verification {
            Some(v) => format!("{}/100 - {}", v.score, v.summary),
            None => "não realizada".into(),
        };
        let prompt = {
            let context = session.context.lock().await;
            prompts::final_response_prompt(
                &context,
                &state.objective,
                &actions.join("\n"),
                &verification,
            )
        };

        let outcome = self.reasoner.reason(&prompt).await;
        match outcome.text() {
            Some(text) if !looks_like_json(text) => text.trim().to_string(),
            Some(_) => {
                warn!(session_id = %state.session_id, "Final response came back as JSON, using fallback");
                deterministic_response(state)
            }
            None => {
                warn!(session_id = %state.session_id, errors = ?outcome.errors, "Final response call failed");
                deterministic_response(state)
            }
        }
    }

    /// Persist what the turn taught and close the session record.
    async fn close_turn(&self, session: &SessionContext, state: &AgentState) -> String {
        let report = state.summary();
        let learned = session.memory.learn_from_interaction(&state.objective).await;
        session
            .memory
            .update_session_summary(&report, state.capabilities_used(), state.activities_created())
            .await;
        debug!(session_id = %state.session_id, learned, "Turn persisted to memory");
        report
    }

    fn publish(&self, session_id: &str, description: &str, step: Option<u32>) {
        let mut update = ProgressUpdate::running(session_id, description);
        if let Some(step) = step {
            update = update.with_step(step);
        }
        self.events.publish(update);
    }

    fn publish_step(&self, session_id: &str, layer: u32, tasks: usize) {
        self.publish(
            session_id,
            &format!("Etapa {layer}: executando {tasks} capability(ies)..."),
            Some(layer),
        );
    }

    fn publish_completed(&self, session_id: &str, metrics: &TurnMetrics) {
        self.events.publish(
            ProgressUpdate::running(session_id, "Processo concluído")
                .with_status(ProgressStatus::Completed)
                .with_result(serde_json::to_value(metrics).unwrap_or(Value::Null)),
        );
    }
}

/// True when the text is a JSON object rather than prose.
fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim().trim_start_matches("```json").trim_start();
    trimmed.starts_with('{') && extract_json_object(trimmed).is_some()
}

/// Response built from the run's results alone.
fn deterministic_response(state: &AgentState) -> String {
    let activities: Vec<Activity> = state
        .successful_actions()
        .filter(|a| a.capability == "create_activity")
        .filter_map(|a| a.result.as_ref())
        .filter_map(|r| r.data.get("activities").cloned())
        .filter_map(|v| serde_json::from_value(v).ok())
        .last()
        .unwrap_or_default();
    if activities.is_empty() {
        return FINAL_RESPONSE_FALLBACK.to_string();
    }

    let saved = state
        .successful_actions()
        .any(|a| a.capability == "save_activities");
    let lines: Vec<String> = activities
        .iter()
        .map(|a| {
            let tags: Vec<&str> = [a.subject.as_deref(), a.grade.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if tags.is_empty() {
                format!("- {}", a.title)
            } else {
                format!("- {} ({})", a.title, tags.join(", "))
            }
        })
        .collect();
    let closing = if saved {
        "Todas já estão salvas na sua conta."
    } else {
        "Elas estão em rascunho; peça para salvar quando quiser."
    };

    format!(
        "Pronto! Criei {} atividade(s) para você:\n{}\n{closing}",
        activities.len(),
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedReasoner;
    use async_trait::async_trait;
    use mentor_capabilities::{ActivityStore, default_registry};
    use mentor_core::MemoryError;
    use mentor_core::memory::{MemoryItem, MemoryType, SessionPatch, SessionRecord};
    use mentor_memory::InMemoryStore;
    use tokio::sync::Notify;

    struct Fixture {
        orchestrator: Orchestrator,
        activities: ActivityStore,
        _cache: tempfile::TempDir,
    }

    fn fixture(reasoner: Arc<ScriptedReasoner>) -> Fixture {
        fixture_with(reasoner, AppConfig::default())
    }

    fn fixture_with(reasoner: Arc<ScriptedReasoner>, mut config: AppConfig) -> Fixture {
        let cache = tempfile::tempdir().unwrap();
        config.memory.cache_dir = Some(cache.path().to_path_buf());

        let activities = ActivityStore::new();
        let registry = Arc::new(default_registry(activities.clone()));
        Fixture {
            orchestrator: Orchestrator::new(
                reasoner,
                registry,
                Arc::new(InMemoryStore::new()),
                &config,
            ),
            activities,
            _cache: cache,
        }
    }

    #[test]
    fn raw_comprehension_accepts_portuguese_keys() {
        let raw: RawComprehension = serde_json::from_str(
            r#"{"resposta_inicial":"Vou criar!","intencao":"CRIAR_ATIVIDADE",
                "entidades":{"quantidade":"3","disciplina":"história"},
                "plano_macro":["pesquisar","decidir",{"etapa":"criar"},"voar"]}"#,
        )
        .unwrap();
        let comprehension = Comprehension::from_raw(raw, "quiz de história para o 6º ano");

        assert_eq!(comprehension.initial_response, "Vou criar!");
        assert_eq!(comprehension.interpretation, INTERPRETATION_FALLBACK);
        assert_eq!(comprehension.entities.quantity, Some(3));
        assert_eq!(comprehension.entities.grade.as_deref(), Some("6º ano"));
        assert_eq!(
            comprehension.macro_plan,
            vec![MacroStep::Research, MacroStep::Decide, MacroStep::Create]
        );
        assert!(!comprehension.fallback);
    }

    #[test]
    fn plan_expands_steps_into_valid_calls() {
        let registry = default_registry(ActivityStore::new());
        let entities = Entities {
            subject: Some("matemática".into()),
            grade: Some("7º ano".into()),
            quantity: Some(2),
            ..Entities::default()
        };
        let plan = MacroPlan::build(&registry, "crie", &MacroStep::DEFAULT_PLAN, &entities);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let names: Vec<String> = plan.capabilities().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "search_activity_catalog",
                "search_account_activities",
                "decide_activities",
                "generate_activity_content",
                "create_activity",
                "save_activities",
            ]
        );
        assert_eq!(plan.steps[0].title, "Pesquisar as melhores opções");
        assert_eq!(plan.steps[1].calls[0].params["quantity"], 2);
        assert!(!plan.steps[0].calls[0].display_name.is_empty());
        assert!(plan.outline().starts_with("1. Pesquisar as melhores opções (search_activity_catalog"));
    }

    #[tokio::test]
    async fn comprehension_failure_uses_the_default_plan() {
        let reasoner = Arc::new(ScriptedReasoner::new(Vec::new()));
        let fx = fixture(reasoner);
        let orchestrator = &fx.orchestrator;

        let (comprehension, plan) = orchestrator
            .comprehend("crie uma atividade de ciências para o 8º ano", "s1", "prof")
            .await;

        assert!(comprehension.fallback);
        assert_eq!(comprehension.initial_response, INITIAL_RESPONSE_FALLBACK);
        assert_eq!(comprehension.intent, "CRIAR_ATIVIDADE");
        assert_eq!(comprehension.entities.grade.as_deref(), Some("8º ano"));
        assert_eq!(plan.steps.len(), 4);
        assert!(orchestrator.session("s1").await.is_some());
    }

    #[tokio::test]
    async fn json_final_response_is_replaced() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"done":true}"#,
            r#"{"response":"isto é json"}"#,
        ]));
        let fx = fixture(reasoner.clone());
        let orchestrator = &fx.orchestrator;
        let registry = default_registry(ActivityStore::new());
        let plan = MacroPlan::build(&registry, "x", &[MacroStep::Research], &Entities::default());

        let turn = orchestrator.execute(&plan, "s1", "prof").await;

        assert_eq!(turn.final_response, FINAL_RESPONSE_FALLBACK);
        // nothing succeeded, so no verification call
        assert!(turn.verification.is_none());
        assert_eq!(turn.metrics.ai_calls, 2);
        assert_eq!(reasoner.calls(), 2);
    }

    #[tokio::test]
    async fn low_score_triggers_one_retry() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"action":"search_account_activities"}"#,
            r#"{"done":true}"#,
            r#"{"score":20,"critical_issues":["nenhuma atividade criada"],"summary":"incompleto"}"#,
            r#"{"done":true}"#,
            r#"{"score":85,"summary":"ok"}"#,
            "Tudo pronto.",
        ]));
        let fx = fixture(reasoner.clone());
        let orchestrator = &fx.orchestrator;
        let registry = default_registry(ActivityStore::new());
        let plan = MacroPlan::build(&registry, "x", &[MacroStep::Research], &Entities::default());

        let turn = orchestrator.execute(&plan, "s1", "prof").await;

        assert!(reasoner.prompt(3).contains("nenhuma atividade criada"));
        let verification = turn.verification.unwrap();
        assert_eq!(verification.score, 85);
        assert_eq!(turn.final_response, "Tudo pronto.");
        assert_eq!(turn.agent_state.thoughts.len(), 3);
        assert_eq!(turn.metrics.ai_calls, 6);
        assert_eq!(turn.metrics.ai_calls as usize, reasoner.calls());
        assert_eq!(turn.metrics.iterations_used, 3);
        let iterations: Vec<u32> = turn.agent_state.thoughts.iter().map(|t| t.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_calls_count_toward_ai_calls() {
        let reasoner = Arc::new(
            ScriptedReasoner::new(vec![r#"{"action":"search_account_activities"}"#]).then_fail(),
        );
        let fx = fixture(reasoner.clone());
        let orchestrator = &fx.orchestrator;
        let registry = default_registry(ActivityStore::new());
        let plan = MacroPlan::build(&registry, "x", &[MacroStep::Research], &Entities::default());

        let turn = orchestrator.execute(&plan, "s1", "prof").await;

        assert_eq!(turn.agent_state.exit_reason, Some(ExitReason::ReasoningFailed));
        assert_eq!(turn.agent_state.thoughts.len(), 1);
        // two loop calls, one failed verification, one failed final response
        assert_eq!(turn.metrics.ai_calls, 4);
        assert_eq!(reasoner.calls(), 4);
    }

    #[tokio::test]
    async fn compressed_context_reaches_the_model() {
        let long = "analisar o catálogo com cuidado ".repeat(13);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"intencao":"CRIAR_ATIVIDADE","plano_macro":["pesquisar"]}"#,
            format!(r#"{{"reasoning":"{long}","action":"search_account_activities"}}"#).as_str(),
            format!(r#"{{"reasoning":"{long}","done":true}}"#).as_str(),
            r#"{"score":90,"summary":"ok"}"#,
            "Pesquisa concluída.",
        ]));
        let mut config = AppConfig::default();
        config.context.max_tokens = 460;
        config.context.compression_threshold = 1.0;
        config.context.keep_recent_blocks = 1;
        let fx = fixture_with(reasoner.clone(), config);
        let orchestrator = &fx.orchestrator;

        let (_, plan) = orchestrator
            .comprehend("pesquise atividades de matemática", "s1", "prof")
            .await;
        let comprehension_prompt = reasoner.prompt(0);
        assert!(comprehension_prompt.starts_with("Você é o Mentor"));
        assert!(comprehension_prompt.contains("PEDIDO DO PROFESSOR:\n\"pesquise atividades de matemática\""));

        let turn = orchestrator.execute(&plan, "s1", "prof").await;
        assert_eq!(turn.final_response, "Pesquisa concluída.");

        let session = orchestrator.session("s1").await.unwrap();
        assert!(session.context.lock().await.compressions() > 0);

        assert!(reasoner.prompt(1).contains("CONTEXTO DA CONVERSA:\nPEDIDO DO PROFESSOR:"));
        let final_prompt = reasoner.prompt(4);
        assert!(final_prompt.starts_with("Você é o Mentor"));
        assert!(final_prompt.contains("HISTÓRICO RESUMIDO:"));
        assert!(final_prompt.contains("PEDIDO DO PROFESSOR:"));
        assert_eq!(turn.metrics.ai_calls, 5);
    }

    /// Store whose table setup for one user waits until released.
    struct GatedStore {
        inner: InMemoryStore,
        slow_user: String,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DurableStore for GatedStore {
        fn name(&self) -> &str {
            "gated"
        }

        async fn init_user_tables(&self, user_id: &str) -> Result<(), MemoryError> {
            if user_id == self.slow_user {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.init_user_tables(user_id).await
        }

        async fn create_session(&self, record: &SessionRecord) -> Result<(), MemoryError> {
            self.inner.create_session(record).await
        }

        async fn create_item(&self, item: &MemoryItem) -> Result<MemoryItem, MemoryError> {
            self.inner.create_item(item).await
        }

        async fn query_items_by_type(
            &self,
            user_id: &str,
            memory_type: MemoryType,
        ) -> Result<Vec<MemoryItem>, MemoryError> {
            self.inner.query_items_by_type(user_id, memory_type).await
        }

        async fn recent_sessions(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<SessionRecord>, MemoryError> {
            self.inner.recent_sessions(user_id, limit).await
        }

        async fn patch_session_summary(
            &self,
            session_id: &str,
            patch: &SessionPatch,
        ) -> Result<(), MemoryError> {
            self.inner.patch_session_summary(session_id, patch).await
        }
    }

    #[tokio::test]
    async fn slow_store_setup_does_not_block_other_sessions() {
        let cache = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.memory.cache_dir = Some(cache.path().to_path_buf());
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            slow_user: "lento".into(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(ScriptedReasoner::new(Vec::new())),
            Arc::new(default_registry(ActivityStore::new())),
            store.clone(),
            &config,
        ));

        let slow = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.comprehend("oi", "s-lento", "lento").await }
        });
        store.entered.notified().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.comprehend("oi", "s-rapido", "rapido"),
        )
        .await;
        assert!(fast.is_ok());
        assert!(orchestrator.session("s-rapido").await.is_some());
        assert!(orchestrator.session("s-lento").await.is_none());

        store.release.notify_one();
        slow.await.unwrap();
        assert!(orchestrator.session("s-lento").await.is_some());
    }

    #[tokio::test]
    async fn verification_note_is_appended() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            r#"{"action":"search_account_activities"}"#,
            r#"{"done":true}"#,
            r#"{"score":55,"suggestions":["incluir gabarito"],"summary":"razoável"}"#,
            "Fiz a pesquisa.",
        ]));
        let fx = fixture(reasoner);
        let orchestrator = &fx.orchestrator;
        let registry = default_registry(ActivityStore::new());
        let plan = MacroPlan::build(&registry, "x", &[MacroStep::Research], &Entities::default());

        let turn = orchestrator.execute(&plan, "s1", "prof").await;

        assert_eq!(
            turn.final_response,
            "Fiz a pesquisa.\n\nObservação de qualidade (55/100):\n- incluir gabarito"
        );
    }

    #[tokio::test]
    async fn offline_pipeline_creates_and_saves() {
        let reasoner = Arc::new(ScriptedReasoner::new(Vec::new()));
        let fx = fixture(reasoner.clone());
        let orchestrator = &fx.orchestrator;
        let entities = Entities {
            subject: Some("história".into()),
            grade: Some("6º ano".into()),
            ..Entities::default()
        };
        let plan = MacroPlan::build(
            orchestrator.registry(),
            "crie uma atividade de história para o 6º ano",
            &MacroStep::DEFAULT_PLAN,
            &entities,
        );

        let turn = orchestrator.run_pipeline(&plan, "s1", "prof").await;

        assert_eq!(reasoner.calls(), 0);
        assert_eq!(turn.metrics.ai_calls, 0);
        assert!(turn.agent_state.actions.iter().all(|a| a.success), "{:?}", turn.agent_state.actions);
        assert_eq!(fx.activities.account("prof").await.len(), 1);
        assert!(turn.final_response.starts_with("Pronto! Criei 1 atividade(s)"));
        assert!(turn.final_response.contains("Todas já estão salvas"));
        assert_eq!(turn.agent_state.exit_reason, Some(ExitReason::Completed));
    }

    #[tokio::test]
    async fn sessions_expire_after_the_configured_age() {
        let reasoner = Arc::new(ScriptedReasoner::new(Vec::new()));
        let fx = fixture(reasoner);
        let orchestrator = &fx.orchestrator;
        orchestrator.comprehend("oi", "s1", "prof").await;

        assert!(orchestrator.expire_idle_sessions(Instant::now()).await.is_empty());
        let later = Instant::now() + Duration::from_secs(2 * 3600);
        assert_eq!(orchestrator.expire_idle_sessions(later).await, vec!["s1"]);
        assert!(!orchestrator.end_session("s1").await);
    }
}
