//! Dependency-aware parallel execution of capabilities.
//!
//! A set of desired capabilities becomes [`ParallelTask`]s, which
//! [`ParallelExecutor::build_execution_plan`] sorts into layers: every
//! task's in-plan dependencies sit in strictly earlier layers. Tasks in a
//! layer run concurrently; layers run in order.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use mentor_core::capability::{CapabilityOutcome, CapabilityRegistry, ExecutionContext};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::Action;

/// Fixed capability → dependency table.
const DEPENDENCIES: &[(&str, &[&str])] = &[
    ("decide_activities", &["search_activity_catalog"]),
    ("generate_activity_content", &["decide_activities"]),
    ("create_activity", &["decide_activities"]),
    ("save_activities", &["create_activity"]),
    ("create_document", &["create_activity"]),
];

/// Capabilities `capability` must wait for.
pub fn dependencies_of(capability: &str) -> &'static [&'static str] {
    DEPENDENCIES
        .iter()
        .find(|(name, _)| *name == capability)
        .map(|(_, deps)| *deps)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelTask {
    pub id: String,
    pub capability: String,
    pub params: serde_json::Value,
    pub dependencies: Vec<String>,
    /// Lower runs first within a layer.
    pub priority: u32,
}

/// Tasks partitioned into ordered layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPlan {
    pub layers: Vec<Vec<ParallelTask>>,
    /// Ids of tasks placed despite unsatisfied dependencies (cycles).
    pub forced: Vec<String>,
}

impl ExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Index of the layer holding `capability`.
    pub fn layer_of(&self, capability: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|t| t.capability == capability))
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub capability: String,
    pub params: serde_json::Value,
    pub outcome: CapabilityOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Not run because an in-plan dependency failed.
    pub skipped: bool,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.outcome.success
    }

    /// Record this result as an action of `iteration`.
    pub fn into_action(self, iteration: u32) -> Action {
        let mut action = Action::from_outcome(
            iteration,
            self.capability,
            self.params,
            self.started_at,
            self.outcome,
        );
        action.finished_at = self.finished_at;
        action
    }
}

/// Results of a full layered run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub layers: Vec<Vec<TaskResult>>,
}

impl PipelineReport {
    pub fn results(&self) -> impl Iterator<Item = &TaskResult> {
        self.layers.iter().flatten()
    }

    pub fn succeeded(&self) -> usize {
        self.results().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results().filter(|r| !r.success()).count()
    }

    /// Actions, one per task, each layer numbered as its own iteration.
    pub fn into_actions(self) -> Vec<Action> {
        self.layers
            .into_iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                let iteration = i as u32 + 1;
                layer.into_iter().map(move |r| r.into_action(iteration))
            })
            .collect()
    }
}

/// Runs capability layers against a shared registry.
#[derive(Clone)]
pub struct ParallelExecutor {
    registry: Arc<CapabilityRegistry>,
}

impl ParallelExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// One task per desired capability, in the given order.
    pub fn create_tasks_from_capabilities(
        capabilities: &[(String, serde_json::Value)],
    ) -> Vec<ParallelTask> {
        capabilities
            .iter()
            .enumerate()
            .map(|(i, (name, params))| ParallelTask {
                id: format!("task-{}-{name}", i + 1),
                capability: name.clone(),
                params: params.clone(),
                dependencies: dependencies_of(name).iter().map(|d| d.to_string()).collect(),
                priority: i as u32,
            })
            .collect()
    }

    /// Layered topological sort.
    ///
    /// Dependencies naming a capability with no task in the set count as
    /// satisfied. When no remaining task is ready (a cycle), the one with
    /// the lowest priority is placed alone so the sort always terminates.
    pub fn build_execution_plan(tasks: Vec<ParallelTask>) -> ExecutionPlan {
        let in_plan: HashSet<String> = tasks.iter().map(|t| t.capability.clone()).collect();
        let mut placed: HashSet<String> = HashSet::new();
        let mut remaining = tasks;
        let mut plan = ExecutionPlan::default();

        while !remaining.is_empty() {
            let (mut ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| !in_plan.contains(dep) || placed.contains(dep))
            });
            remaining = blocked;

            if ready.is_empty() {
                let Some(index) = remaining
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, t)| t.priority)
                    .map(|(i, _)| i)
                else {
                    break;
                };
                let task = remaining.remove(index);
                warn!(
                    task = %task.id,
                    capability = %task.capability,
                    "Dependency cycle detected, forcing task into its own layer"
                );
                plan.forced.push(task.id.clone());
                ready.push(task);
            }

            ready.sort_by_key(|t| t.priority);
            placed.extend(ready.iter().map(|t| t.capability.clone()));
            plan.layers.push(ready);
        }

        debug!(
            layers = plan.layers.len(),
            tasks = plan.task_count(),
            "Built execution plan"
        );
        plan
    }

    /// Run one layer. More than one task runs concurrently; a failure never
    /// cancels its siblings. Returns one result per task, in layer order.
    pub async fn execute_parallel_layer(
        &self,
        layer: &[ParallelTask],
        ctx: &ExecutionContext,
    ) -> Vec<TaskResult> {
        match layer {
            [] => Vec::new(),
            [task] => vec![self.run_task(task, ctx).await],
            tasks => join_all(tasks.iter().map(|task| self.run_task(task, ctx))).await,
        }
    }

    /// Run every layer in order.
    ///
    /// Successful outcomes are written to `ctx.previous_results` before the
    /// next layer starts. A task whose in-plan dependency failed is recorded
    /// as a skipped failure; independent tasks of later layers still run.
    pub async fn execute_full_pipeline(
        &self,
        plan: &ExecutionPlan,
        ctx: &mut ExecutionContext,
    ) -> PipelineReport {
        let in_plan: HashSet<&str> = plan
            .layers
            .iter()
            .flatten()
            .map(|t| t.capability.as_str())
            .collect();
        let mut failed: HashSet<String> = HashSet::new();
        let mut report = PipelineReport::default();

        for (index, layer) in plan.layers.iter().enumerate() {
            let layer_number = index + 1;
            let (runnable, blocked): (Vec<ParallelTask>, Vec<ParallelTask>) =
                layer.iter().cloned().partition(|task| {
                    !task
                        .dependencies
                        .iter()
                        .any(|dep| in_plan.contains(dep.as_str()) && failed.contains(dep))
                });

            info!(
                session_id = %ctx.session_id,
                layer = layer_number,
                tasks = runnable.len(),
                skipped = blocked.len(),
                "Executing layer"
            );

            let mut results = self.execute_parallel_layer(&runnable, ctx).await;
            results.extend(blocked.into_iter().map(skipped_result));

            let failures: Vec<&str> = results
                .iter()
                .filter(|r| !r.success())
                .map(|r| r.capability.as_str())
                .collect();
            if !failures.is_empty() {
                warn!(
                    session_id = %ctx.session_id,
                    layer = layer_number,
                    failed = ?failures,
                    "Layer finished with failures, continuing"
                );
            }

            for result in &results {
                if result.success() {
                    failed.remove(&result.capability);
                    ctx.previous_results
                        .insert(result.capability.clone(), result.outcome.clone());
                } else {
                    failed.insert(result.capability.clone());
                }
            }
            report.layers.push(results);
        }

        info!(
            session_id = %ctx.session_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Pipeline finished"
        );
        report
    }

    async fn run_task(&self, task: &ParallelTask, ctx: &ExecutionContext) -> TaskResult {
        let started_at = Utc::now();
        debug!(task = %task.id, capability = %task.capability, "Running task");
        let outcome = self
            .registry
            .execute(&task.capability, task.params.clone(), ctx)
            .await;
        TaskResult {
            task_id: task.id.clone(),
            capability: task.capability.clone(),
            params: task.params.clone(),
            outcome,
            started_at,
            finished_at: Utc::now(),
            skipped: false,
        }
    }
}

fn skipped_result(task: ParallelTask) -> TaskResult {
    let now = Utc::now();
    let reason = format!(
        "skipped: a dependency of {} failed ({})",
        task.capability,
        task.dependencies.join(", ")
    );
    TaskResult {
        task_id: task.id,
        capability: task.capability,
        params: task.params,
        outcome: CapabilityOutcome::failure(reason),
        started_at: now,
        finished_at: now,
        skipped: true,
    }
}
