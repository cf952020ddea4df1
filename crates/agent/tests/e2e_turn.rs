//! End-to-end turns over the real capability registry and an in-memory
//! store, with a scripted reasoner standing in for the model.

use async_trait::async_trait;
use mentor_agent::{ExitReason, MacroStep, Orchestrator, ParallelExecutor};
use mentor_capabilities::{ActivityStore, default_registry};
use mentor_config::AppConfig;
use mentor_core::provider::{Reasoner, ReasoningOutcome};
use mentor_core::{DurableStore, ProgressStatus};
use mentor_memory::{InMemoryStore, MemorySettings, PersistentMemory};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const REQUEST: &str = "crie uma atividade de matemática para o 7º ano";

struct Script {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl Script {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Reasoner for Script {
    async fn reason(&self, _prompt: &str) -> ReasoningOutcome {
        *self.calls.lock().unwrap() += 1;
        match self.replies.lock().unwrap().pop_front() {
            Some(text) => ReasoningOutcome::succeeded(text, "script", "script-1", 1, Vec::new()),
            None => ReasoningOutcome::failed(1, vec!["script exhausted".into()]),
        }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    activities: ActivityStore,
    store: Arc<dyn DurableStore>,
    cache: tempfile::TempDir,
}

fn harness(reasoner: Arc<Script>) -> Harness {
    let cache = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.memory.cache_dir = Some(cache.path().to_path_buf());

    let activities = ActivityStore::new();
    let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::new(
        reasoner,
        Arc::new(default_registry(activities.clone())),
        store.clone(),
        &config,
    );
    Harness {
        orchestrator,
        activities,
        store,
        cache,
    }
}

#[tokio::test]
async fn math_activity_turn() {
    let reasoner = Arc::new(Script::new(&[
        r#"```json
{"initial_response":"Vou preparar uma atividade de matemática para o 7º ano!",
 "interpretation":"Criar uma atividade de matemática para o 7º ano",
 "intent":"CRIAR_ATIVIDADE",
 "entities":{"quantity":1,"subject":"matemática","grade":"7º ano","activity_type":null,"topic":null},
 "macro_plan":["research","decide","create","persist"]}
```"#,
        r#"{"reasoning":"pesquisar catálogo e conta","parallel_actions":[
            {"action":"search_activity_catalog","params":{"subject":"matemática","grade":"7º ano"}},
            {"action":"search_account_activities","params":{}}],"done":false}"#,
        r#"{"reasoning":"decidir","action":"decide_activities","params":{"context":"crie uma atividade de matemática para o 7º ano","quantity":1}}"#,
        r#"{"reasoning":"conteúdo","action":"generate_activity_content","params":{}}"#,
        r#"{"reasoning":"criar","action":"create_activity","params":{}}"#,
        r#"{"reasoning":"salvar","action":"save_activities","params":{}}"#,
        r#"{"reasoning":"tudo feito","done":true}"#,
        r#"{"score":88,"checks":[{"criterion":"completeness","passed":true}],"summary":"Atividade criada e salva"}"#,
        "Criei 1 atividade de matemática para o 7º ano e ela já está salva na sua conta.",
    ]));
    let h = harness(reasoner.clone());
    let mut progress = h.orchestrator.events().subscribe();

    let (comprehension, plan) = h.orchestrator.comprehend(REQUEST, "s1", "prof-ana").await;
    assert!(!comprehension.fallback);
    assert_eq!(comprehension.intent, "CRIAR_ATIVIDADE");
    assert_eq!(comprehension.macro_plan, MacroStep::DEFAULT_PLAN.to_vec());

    let layers = ParallelExecutor::build_execution_plan(
        ParallelExecutor::create_tasks_from_capabilities(&plan.capabilities()),
    );
    assert_eq!(layers.layers[0].len(), 2);
    assert_eq!(layers.layer_of("search_account_activities"), Some(0));

    let turn = h.orchestrator.execute(&plan, "s1", "prof-ana").await;

    assert_eq!(turn.agent_state.exit_reason, Some(ExitReason::Completed));
    assert!(turn.agent_state.actions.iter().all(|a| a.success));
    let verification = turn.verification.as_ref().unwrap();
    assert!(verification.score >= 40);
    assert!(verification.approved);
    assert!(turn.final_response.contains("matemática"));
    assert!(turn.final_response.contains("7º ano"));
    assert_eq!(turn.agent_state.activities_created().len(), 1);
    assert_eq!(h.activities.account("prof-ana").await.len(), 1);

    assert_eq!(turn.metrics.iterations_used, 6);
    assert_eq!(turn.metrics.parallel_executions, 1);
    assert_eq!(turn.metrics.capabilities_executed, 6);
    assert_eq!(turn.metrics.ai_calls, 9);
    assert_eq!(reasoner.calls(), 9);

    let mut last = None;
    while let Ok(update) = progress.try_recv() {
        last = Some(update);
    }
    assert_eq!(last.unwrap().status, ProgressStatus::Completed);

    // a later session of the same teacher sees what was learned
    let next = PersistentMemory::new(
        "prof-ana",
        "s2",
        h.store.clone(),
        MemorySettings {
            cache_dir: Some(h.cache.path().to_path_buf()),
            ..MemorySettings::default()
        },
    );
    assert!(next.initialize().await);
    let prefs = next.get_preferences().await;
    assert!(prefs.iter().any(|p| p.content == "matemática"));
    assert!(prefs.iter().any(|p| p.content == "7º ano"));
    let sessions = next.get_recent_sessions(5).await;
    assert!(sessions.iter().any(|s| s.session_id == "s1" && s.summary.is_some()));
}

#[tokio::test]
async fn offline_turn_without_a_model() {
    let reasoner = Arc::new(Script::new(&[]));
    let h = harness(reasoner.clone());

    let (comprehension, plan) = h.orchestrator.comprehend(REQUEST, "s1", "prof-ana").await;
    assert!(comprehension.fallback);
    assert_eq!(comprehension.entities.subject.as_deref(), Some("matemática"));

    let turn = h.orchestrator.run_pipeline(&plan, "s1", "prof-ana").await;

    // only the failed comprehension call
    assert_eq!(reasoner.calls(), 1);
    assert_eq!(turn.metrics.ai_calls, 1);
    assert!(turn.verification.is_none());
    assert_eq!(turn.metrics.parallel_executions, 2);
    assert_eq!(h.activities.account("prof-ana").await.len(), 1);
    assert!(turn.final_response.contains("matemática"));
    assert!(turn.final_response.contains("7º ano"));
}
