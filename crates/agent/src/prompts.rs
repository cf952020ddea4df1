//! Prompt templates for every reasoning call.
//!
//! Templates ask for strict JSON with English keys; the decoders accept the
//! Portuguese keys older prompts used as aliases.

use mentor_core::capability::CapabilityRegistry;

use crate::context::ContextEngine;
use crate::state::AgentState;

/// Longest rendered capability result in the loop history.
const HISTORY_RESULT_CHARS: usize = 500;

const REACT_PROMPT: &str = "Você é o Mentor, assistente de IA para professores.

Você opera em um loop de PENSAR → AGIR → OBSERVAR.
A cada iteração, analise o estado atual e decida a próxima ação.

CAPABILITIES DISPONÍVEIS:
{capabilities}

REGRAS DO LOOP:
1. Analise o que já foi feito (observações anteriores)
2. Decida a próxima capability a executar
3. Se tudo necessário já foi feito, sinalize done
4. Capabilities independentes podem ser executadas em paralelo

FORMATO DE RESPOSTA (JSON ESTRITO):
{
  \"reasoning\": \"análise do estado atual e raciocínio sobre a próxima ação\",
  \"action\": \"nome_da_capability\" ou null,
  \"params\": {},
  \"parallel_actions\": [{\"action\": \"nome\", \"params\": {}}] ou null,
  \"done\": true/false
}

PIPELINE TÍPICO:
1. search_activity_catalog + search_account_activities (PARALELO)
2. decide_activities (usa os resultados da pesquisa)
3. generate_activity_content (conteúdo das atividades decididas)
4. create_activity
5. save_activities
6. create_document (OPCIONAL)
7. done

IMPORTANTE:
- Use APENAS os nomes de capabilities listados acima
- Nunca repita uma capability já executada com sucesso
- Se uma capability falhou, tente novamente com parâmetros diferentes";

const COMPREHENSION_INSTRUCTION: &str = "SUA TAREFA: interprete o último pedido do professor e responda com JSON:
{
  \"initial_response\": \"mensagem acolhedora e específica (2-4 frases) mostrando que entendeu o pedido\",
  \"interpretation\": \"resumo do que o professor quer em 1 frase\",
  \"intent\": \"CRIAR_ATIVIDADE | CRIAR_AVALIACAO | PESQUISAR | PLANEJAR | OUTRO\",
  \"entities\": {
    \"quantity\": null,
    \"subject\": null,
    \"grade\": null,
    \"activity_type\": null,
    \"topic\": null
  },
  \"macro_plan\": [\"research\", \"decide\", \"create\", \"persist\"]
}

Passos válidos em macro_plan: research, decide, create, persist, document.

REGRAS:
- Seja direto e específico na initial_response
- NÃO mencione \"plano de ação\" ou termos técnicos
- Retorne APENAS o JSON";

const VERIFICATION_PROMPT: &str = "Você é um revisor pedagógico. Avalie se a execução abaixo atendeu ao pedido do professor.

PEDIDO ORIGINAL:
\"{objective}\"

RESUMO DA EXECUÇÃO:
{summary}

CRITÉRIOS:
1. completeness: tudo o que foi pedido foi feito?
2. pedagogical_coherence: as atividades fazem sentido para a série e a disciplina?
3. content_quality: o conteúdo gerado é específico e utilizável?
4. alignment: o resultado corresponde ao pedido?
5. integrity: as atividades foram criadas e salvas sem erros?

Responda APENAS com JSON:
{
  \"score\": 0-100,
  \"checks\": [{\"criterion\": \"completeness\", \"passed\": true, \"severity\": \"low|medium|critical\", \"note\": \"...\"}],
  \"suggestions\": [\"...\"],
  \"critical_issues\": [\"...\"],
  \"summary\": \"uma frase\"
}";

const FINAL_RESPONSE_INSTRUCTION: &str = "PEDIDO ORIGINAL: \"{objective}\"

AÇÕES REALIZADAS:
{actions}

VERIFICAÇÃO: {verification}

Gere uma RESPOSTA FINAL concisa (3-5 frases):
1. Resuma o que foi feito em resposta ao pedido
2. Mencione dados específicos (tipos, quantidades, disciplina, série)
3. Ofereça próximos passos úteis

REGRAS:
- NUNCA retorne JSON ou dados técnicos
- Seja específico e conecte com o pedido original

Retorne APENAS a resposta em texto.";

/// Capability list with descriptions, followed by the name whitelist.
pub fn capability_catalog(registry: &CapabilityRegistry) -> String {
    let mut out = String::new();
    for descriptor in registry.descriptors() {
        out.push_str(&format!(
            "- {} [{}]: {}\n  parâmetros: {}\n",
            descriptor.name, descriptor.category, descriptor.description, descriptor.parameters
        ));
    }
    out.push('\n');
    out.push_str(&registry.whitelist().prompt);
    out
}

/// The think prompt: catalog, objective, optional context and the run so far.
pub fn think_prompt(state: &AgentState, catalog: &str, context: &str) -> String {
    let mut history = Vec::new();
    for thought in &state.thoughts {
        history.push(format!("\n--- Iteração {} ---", thought.iteration));
        history.push(format!("PENSAMENTO: {}", thought.reasoning));

        for action in state.actions.iter().filter(|a| a.iteration == thought.iteration) {
            let outcome = if action.success { "sucesso" } else { "falha" };
            history.push(format!(
                "AÇÃO: {} ({outcome}, {}ms)",
                action.capability,
                action.duration_ms()
            ));
            if let Some(result) = &action.result {
                let rendered = serde_json::to_string(&result.data).unwrap_or_default();
                history.push(format!(
                    "RESULTADO: {} {}",
                    result.message,
                    truncate(&rendered, HISTORY_RESULT_CHARS)
                ));
            }
            if let Some(error) = &action.error {
                history.push(format!("ERRO: {error}"));
            }
        }

        for obs in state.observations.iter().filter(|o| o.iteration == thought.iteration) {
            history.push(format!("OBSERVAÇÃO: {}", obs.summary));
            if !obs.data_discovered.is_empty() {
                history.push(format!("DADOS: {}", obs.data_discovered.join(", ")));
            }
        }
    }

    let history = if history.is_empty() {
        "Nenhuma ação executada ainda. Esta é a primeira iteração.".to_string()
    } else {
        history.join("\n")
    };
    let context = if context.trim().is_empty() {
        String::new()
    } else {
        format!("CONTEXTO DA CONVERSA:\n{context}\n\n")
    };

    format!(
        "{}\n\nPEDIDO DO PROFESSOR:\n\"{}\"\n\n{context}HISTÓRICO DE EXECUÇÃO:\n{history}\n\nITERAÇÃO ATUAL: {} de {}\n\nAnalise o estado e decida a próxima ação. Responda APENAS com JSON válido.",
        REACT_PROMPT.replace("{capabilities}", catalog),
        state.objective,
        state.iteration,
        state.max_iterations,
    )
}

/// The session's budgeted context followed by the comprehension task.
pub fn comprehension_prompt(context: &ContextEngine) -> String {
    context.build_prompt(Some(COMPREHENSION_INSTRUCTION))
}

pub fn verification_prompt(objective: &str, summary: &str) -> String {
    VERIFICATION_PROMPT
        .replace("{objective}", objective)
        .replace("{summary}", summary)
}

/// The session's budgeted context followed by the final-response task.
pub fn final_response_prompt(
    context: &ContextEngine,
    objective: &str,
    actions: &str,
    verification: &str,
) -> String {
    let actions = if actions.trim().is_empty() {
        "Nenhuma ação concluída"
    } else {
        actions
    };
    let instruction = FINAL_RESPONSE_INSTRUCTION
        .replace("{objective}", objective)
        .replace("{actions}", actions)
        .replace("{verification}", verification);
    context.build_prompt(Some(&instruction))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Action, Thought};
    use chrono::Utc;
    use mentor_capabilities::{ActivityStore, default_registry};
    use mentor_core::CapabilityOutcome;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn catalog_lists_every_capability() {
        let registry = default_registry(ActivityStore::new());
        let catalog = capability_catalog(&registry);
        for name in registry.names() {
            assert!(catalog.contains(&format!("\"{name}\"")), "{name} missing");
        }
    }

    #[tokio::test]
    async fn first_iteration_prompt() {
        let mut state = AgentState::new("s", "u", "crie um quiz", 10, Duration::from_secs(60));
        state.iteration = 1;
        let prompt = think_prompt(&state, "CATALOGO", "");

        assert!(prompt.contains("CATALOGO"));
        assert!(prompt.contains("\"crie um quiz\""));
        assert!(prompt.contains("Esta é a primeira iteração"));
        assert!(prompt.contains("ITERAÇÃO ATUAL: 1 de 10"));
        assert!(!prompt.contains("CONTEXTO DA CONVERSA"));
    }

    #[tokio::test]
    async fn history_includes_actions_and_truncates_results() {
        let mut state = AgentState::new("s", "u", "x", 10, Duration::from_secs(60));
        state.iteration = 2;
        state.thoughts.push(Thought::parse(1, r#"{"reasoning":"buscar"}"#));
        state.actions.push(Action::from_outcome(
            1,
            "search_activity_catalog",
            json!({}),
            Utc::now(),
            CapabilityOutcome::ok("ok", json!({ "blob": "z".repeat(2_000) })),
        ));
        let prompt = think_prompt(&state, "", "preferências");

        assert!(prompt.contains("--- Iteração 1 ---"));
        assert!(prompt.contains("AÇÃO: search_activity_catalog (sucesso, "));
        assert!(prompt.contains("CONTEXTO DA CONVERSA:\npreferências"));
        assert!(!prompt.contains(&"z".repeat(600)));
    }

    #[test]
    fn comprehension_prompt_carries_the_session_context() {
        let mut context = ContextEngine::new("s");
        context.add_user_input("quiz de história");
        let prompt = comprehension_prompt(&context);
        assert!(prompt.starts_with("Você é o Mentor"));
        assert!(prompt.contains("PEDIDO DO PROFESSOR:\n\"quiz de história\""));
        assert!(!prompt.contains("MEMÓRIA DO PROFESSOR"));
        assert!(prompt.ends_with("Retorne APENAS o JSON"));

        context.add_memory_context("- frequent_subject: história");
        assert!(comprehension_prompt(&context).contains("MEMÓRIA DO PROFESSOR:\n- frequent_subject"));
    }

    #[test]
    fn final_prompt_lists_actions_after_the_context() {
        let mut context = ContextEngine::new("s");
        context.add_user_input("crie um quiz");
        let prompt = final_response_prompt(&context, "crie um quiz", "", "não realizada");

        let request = prompt.find("PEDIDO DO PROFESSOR").unwrap();
        let task = prompt.find("Nenhuma ação concluída").unwrap();
        assert!(request < task);
        assert!(prompt.contains("VERIFICAÇÃO: não realizada"));
    }
}
