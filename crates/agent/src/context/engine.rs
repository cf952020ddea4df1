//! Token-budgeted prompt context for one session.
//!
//! Blocks are appended in order. After every append, if the estimated
//! total exceeds `threshold × max_tokens`, every compressible block except
//! the most recent `keep_recent` collapses into one summary block. The
//! system prologue and user inputs are never compressed.

use chrono::{DateTime, Utc};
use mentor_config::ContextConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::token::estimate_tokens;
use crate::state::{Action, Observation, Thought};

const DEFAULT_MAX_TOKENS: usize = 32_000;
const DEFAULT_THRESHOLD: f64 = 0.7;
const DEFAULT_KEEP_RECENT: usize = 3;

/// Longest line a dropped block contributes to the summary.
const SUMMARY_LINE_CHARS: usize = 100;

/// Longest capability result rendered into an action block.
const RESULT_CHARS: usize = 300;

const SUMMARY_HEADER: &str = "HISTÓRICO RESUMIDO:";

const SYSTEM_PROLOGUE: &str = "Você é o Mentor, assistente de IA para professores.
Sua especialidade é ajudar professores a criar atividades educacionais personalizadas.

SUAS CAPACIDADES:
- Pesquisar atividades disponíveis no catálogo
- Pesquisar atividades já criadas pelo professor
- Decidir quais atividades criar a partir do contexto
- Gerar conteúdo pedagógico para atividades
- Criar atividades personalizadas
- Salvar atividades na conta do professor
- Gerar documentos complementares (dossiê, resumo, roteiro)

PRINCÍPIOS:
- Interprete o pedido do professor com atenção
- Priorize qualidade pedagógica sobre quantidade
- Adapte o conteúdo à série e à disciplina mencionadas
- Seja específico nos dados e resultados apresentados";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    System,
    UserInput,
    Memory,
    Thought,
    Action,
    Observation,
    Summary,
}

impl BlockKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::UserInput => "user",
            Self::Memory => "memory",
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub id: String,
    pub kind: BlockKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Estimated token cost of `content`.
    pub tokens: usize,
    pub compressible: bool,
}

/// Prompt context for one session.
#[derive(Debug, Clone)]
pub struct ContextEngine {
    session_id: String,
    blocks: Vec<ContextBlock>,
    max_tokens: usize,
    threshold: f64,
    keep_recent: usize,
    next_id: u64,
    compressions: u32,
}

impl ContextEngine {
    /// Create an engine with the default budget (32k tokens, 0.7, keep 3).
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_budget(session_id, DEFAULT_MAX_TOKENS, DEFAULT_THRESHOLD, DEFAULT_KEEP_RECENT)
    }

    pub fn from_config(session_id: impl Into<String>, config: &ContextConfig) -> Self {
        Self::with_budget(
            session_id,
            config.max_tokens,
            config.compression_threshold,
            config.keep_recent_blocks,
        )
    }

    /// Create an engine with an explicit budget. The system prologue is
    /// added immediately.
    pub fn with_budget(
        session_id: impl Into<String>,
        max_tokens: usize,
        threshold: f64,
        keep_recent: usize,
    ) -> Self {
        let mut engine = Self {
            session_id: session_id.into(),
            blocks: Vec::new(),
            max_tokens,
            threshold,
            keep_recent,
            next_id: 0,
            compressions: 0,
        };
        engine.add_block(BlockKind::System, SYSTEM_PROLOGUE, false);
        engine
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn blocks(&self) -> &[ContextBlock] {
        &self.blocks
    }

    pub fn total_tokens(&self) -> usize {
        self.blocks.iter().map(|b| b.tokens).sum()
    }

    /// Token count above which the next append compresses.
    pub fn compression_limit(&self) -> usize {
        (self.max_tokens as f64 * self.threshold) as usize
    }

    /// How many times history has been compressed.
    pub fn compressions(&self) -> u32 {
        self.compressions
    }

    /// Append a block and compress if the budget is exceeded.
    /// Returns the new block's id.
    pub fn add_block(
        &mut self,
        kind: BlockKind,
        content: impl Into<String>,
        compressible: bool,
    ) -> String {
        let content = content.into();
        self.next_id += 1;
        let id = format!("{}-{}", kind.prefix(), self.next_id);
        self.blocks.push(ContextBlock {
            id: id.clone(),
            kind,
            tokens: estimate_tokens(&content),
            content,
            timestamp: Utc::now(),
            compressible,
        });
        self.compress_if_needed();
        id
    }

    pub fn add_user_input(&mut self, request: &str) -> String {
        self.add_block(
            BlockKind::UserInput,
            format!("PEDIDO DO PROFESSOR:\n\"{request}\""),
            false,
        )
    }

    /// Add the memory digest. Blank digests add nothing.
    pub fn add_memory_context(&mut self, memory: &str) -> Option<String> {
        if memory.trim().is_empty() {
            return None;
        }
        Some(self.add_block(
            BlockKind::Memory,
            format!("MEMÓRIA DO PROFESSOR:\n{memory}"),
            true,
        ))
    }

    pub fn add_thought(&mut self, thought: &Thought) -> String {
        let mut content = format!(
            "PENSAMENTO (iteração {}):\n{}",
            thought.iteration, thought.reasoning
        );
        if let Some(next) = &thought.next_action {
            content.push_str(&format!("\nPróxima ação: {next}"));
        }
        self.add_block(BlockKind::Thought, content, true)
    }

    pub fn add_action(&mut self, action: &Action) -> String {
        let mark = if action.success { "✓" } else { "✗" };
        let mut content = format!(
            "AÇÃO: {} ({mark}, {}ms)",
            action.capability,
            action.duration_ms()
        );
        if let Some(result) = &action.result {
            content.push_str(&format!("\nRESULTADO: {}", summarize_result(result)));
        }
        if let Some(error) = &action.error {
            content.push_str(&format!("\nERRO: {error}"));
        }
        self.add_block(BlockKind::Action, content, true)
    }

    pub fn add_observation(&mut self, observation: &Observation) -> String {
        let mut content = format!(
            "OBSERVAÇÃO (iteração {}):\n{}",
            observation.iteration, observation.summary
        );
        if !observation.data_discovered.is_empty() {
            content.push_str(&format!("\nDados: {}", observation.data_discovered.join(", ")));
        }
        self.add_block(BlockKind::Observation, content, true)
    }

    /// Concatenate all blocks, plus an optional trailing instruction.
    pub fn build_prompt(&self, instruction: Option<&str>) -> String {
        let mut parts: Vec<&str> = self.blocks.iter().map(|b| b.content.as_str()).collect();
        if let Some(instruction) = instruction.filter(|i| !i.trim().is_empty()) {
            parts.push(instruction);
        }
        parts.join("\n\n")
    }

    /// Every block after the system prologue, for prompts that carry their
    /// own preamble.
    pub fn conversation(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind != BlockKind::System)
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn compress_if_needed(&mut self) {
        let before = self.total_tokens();
        if before <= self.compression_limit() {
            return;
        }

        let compressible: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.compressible)
            .map(|(i, _)| i)
            .collect();
        if compressible.len() <= self.keep_recent {
            return;
        }
        let split = compressible.len() - self.keep_recent;
        let dropped = &compressible[..split];

        let lines: Vec<String> = dropped
            .iter()
            .map(|&i| summarize_block(&self.blocks[i]))
            .collect();
        let summary = format!("{SUMMARY_HEADER}\n{}", lines.join("\n"));
        let summary_tokens = estimate_tokens(&summary);
        let dropped_tokens: usize = dropped.iter().map(|&i| self.blocks[i].tokens).sum();
        if summary_tokens >= dropped_tokens {
            debug!(
                session_id = %self.session_id,
                summary_tokens,
                dropped_tokens,
                "Compression would not shrink context, skipping"
            );
            return;
        }

        let blocks = std::mem::take(&mut self.blocks);
        let mut kept = Vec::with_capacity(blocks.len() - split + 1);
        let mut recent = Vec::with_capacity(self.keep_recent);
        for (i, block) in blocks.into_iter().enumerate() {
            if !block.compressible {
                kept.push(block);
            } else if !dropped.contains(&i) {
                recent.push(block);
            }
        }

        self.next_id += 1;
        kept.push(ContextBlock {
            id: format!("summary-{}", self.next_id),
            kind: BlockKind::Summary,
            tokens: summary_tokens,
            content: summary,
            timestamp: Utc::now(),
            compressible: true,
        });
        kept.extend(recent);
        self.blocks = kept;
        self.compressions += 1;

        info!(
            session_id = %self.session_id,
            tokens_before = before,
            tokens_after = self.total_tokens(),
            blocks_summarized = split,
            "Compressed context history"
        );
    }
}

/// One summary line for a dropped block.
fn summarize_block(block: &ContextBlock) -> String {
    match block.kind {
        BlockKind::Thought => format!("[Pensamento {}: resumido]", block.id),
        BlockKind::Action | BlockKind::Observation => {
            truncate_chars(block.content.lines().next().unwrap_or_default(), SUMMARY_LINE_CHARS)
        }
        BlockKind::Summary => {
            let body = block
                .content
                .strip_prefix(SUMMARY_HEADER)
                .unwrap_or(&block.content)
                .trim_start()
                .replace('\n', " ");
            truncate_chars(&body, SUMMARY_LINE_CHARS)
        }
        _ => truncate_chars(&block.content.replace('\n', " "), SUMMARY_LINE_CHARS),
    }
}

/// Short text for a capability outcome.
fn summarize_result(result: &mentor_core::CapabilityOutcome) -> String {
    let mut parts = vec![format!("success: {}", result.success)];
    for key in ["count", "total"] {
        if let Some(n) = result.data.get(key).and_then(|v| v.as_u64()) {
            parts.push(format!("{key}: {n}"));
        }
    }
    if let Some(activities) = result.data.get("activities").and_then(|v| v.as_array()) {
        parts.push(format!("{} atividades", activities.len()));
    }
    if !result.message.is_empty() {
        parts.push(result.message.clone());
    }
    if let Some(error) = &result.error {
        parts.push(format!("erro: {error}"));
    }
    truncate_chars(&parts.join(" | "), RESULT_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}...")
}
