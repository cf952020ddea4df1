//! Shared test utilities for agent tests.

use async_trait::async_trait;
use mentor_core::provider::{Reasoner, ReasoningOutcome};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A reasoner that returns canned replies in order.
///
/// Once the script runs out it repeats `fallback` when set, otherwise it
/// reports a failed call.
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<ReasoningOutcome>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(reply).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `text`.
    pub fn repeating(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new(Vec::new())
        }
    }

    /// Queue a failed call.
    pub fn then_fail(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ReasoningOutcome::failed(1, vec!["scripted: offline".into()]));
        self
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

fn reply(text: &str) -> ReasoningOutcome {
    ReasoningOutcome::succeeded(text, "scripted", "scripted-model", 1, Vec::new())
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, prompt: &str) -> ReasoningOutcome {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(text) => reply(text),
            None => ReasoningOutcome::failed(1, vec!["scripted: no more replies".into()]),
        }
    }
}
