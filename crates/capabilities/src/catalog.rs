//! The activity catalog.
//!
//! A fixed list of activity templates a teacher can request. Entries with
//! no subjects fit every subject. Grades are school years: 1–9 for the
//! fundamental years, 10–12 for the three high-school years.

use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub title: &'static str,
    pub activity_type: &'static str,
    pub description: &'static str,
    /// Folded subject names (see [`fold`]). Empty means any subject.
    pub subjects: &'static [&'static str],
    pub min_grade: u8,
    pub max_grade: u8,
}

impl CatalogEntry {
    pub fn fits_subject(&self, subject: &str) -> bool {
        self.subjects.is_empty() || self.is_specific_to(subject)
    }

    pub fn is_specific_to(&self, subject: &str) -> bool {
        let folded = fold(subject);
        self.subjects.iter().any(|s| *s == folded)
    }

    pub fn fits_grade(&self, grade: u8) -> bool {
        (self.min_grade..=self.max_grade).contains(&grade)
    }
}

static CATALOG: LazyLock<Vec<CatalogEntry>> = LazyLock::new(|| {
    vec![
        CatalogEntry {
            id: "problemas-contextualizados",
            title: "Problemas Contextualizados",
            activity_type: "problemas",
            description: "Situações-problema do cotidiano resolvidas passo a passo",
            subjects: &["matematica", "ciencias"],
            min_grade: 3,
            max_grade: 12,
        },
        CatalogEntry {
            id: "tabuada-ilustrada",
            title: "Tabuada Ilustrada",
            activity_type: "exercicios",
            description: "Prática de multiplicação com apoio visual",
            subjects: &["matematica"],
            min_grade: 2,
            max_grade: 5,
        },
        CatalogEntry {
            id: "roteiro-experimento",
            title: "Roteiro de Experimento",
            activity_type: "pratica",
            description: "Experimento guiado com hipótese, procedimento e conclusão",
            subjects: &["ciencias"],
            min_grade: 4,
            max_grade: 12,
        },
        CatalogEntry {
            id: "linha-do-tempo",
            title: "Linha do Tempo",
            activity_type: "organizador",
            description: "Ordenação de fatos históricos com datas e contexto",
            subjects: &["historia"],
            min_grade: 4,
            max_grade: 12,
        },
        CatalogEntry {
            id: "leitura-de-mapas",
            title: "Leitura de Mapas",
            activity_type: "pratica",
            description: "Interpretação de mapas, escalas e legendas",
            subjects: &["geografia"],
            min_grade: 3,
            max_grade: 12,
        },
        CatalogEntry {
            id: "producao-textual",
            title: "Proposta de Produção Textual",
            activity_type: "redacao",
            description: "Proposta de escrita com gênero, tema e critérios de correção",
            subjects: &["portugues", "ingles"],
            min_grade: 3,
            max_grade: 12,
        },
        CatalogEntry {
            id: "caca-palavras",
            title: "Caça-Palavras",
            activity_type: "jogo",
            description: "Vocabulário temático em grade de letras",
            subjects: &["portugues", "ingles", "ciencias", "historia", "geografia"],
            min_grade: 1,
            max_grade: 7,
        },
        CatalogEntry {
            id: "lista-exercicios",
            title: "Lista de Exercícios",
            activity_type: "exercicios",
            description: "Questões graduadas do básico ao desafio",
            subjects: &[],
            min_grade: 1,
            max_grade: 12,
        },
        CatalogEntry {
            id: "quiz-interativo",
            title: "Quiz Interativo",
            activity_type: "quiz",
            description: "Perguntas de múltipla escolha com feedback imediato",
            subjects: &[],
            min_grade: 1,
            max_grade: 12,
        },
        CatalogEntry {
            id: "plano-de-aula",
            title: "Plano de Aula",
            activity_type: "planejamento",
            description: "Objetivos, etapas, recursos e avaliação de uma aula",
            subjects: &[],
            min_grade: 1,
            max_grade: 12,
        },
        CatalogEntry {
            id: "mapa-mental",
            title: "Mapa Mental",
            activity_type: "organizador",
            description: "Conceitos centrais e suas relações em um diagrama",
            subjects: &[],
            min_grade: 3,
            max_grade: 12,
        },
        CatalogEntry {
            id: "flash-cards",
            title: "Flash Cards",
            activity_type: "revisao",
            description: "Cartões de pergunta e resposta para revisão espaçada",
            subjects: &[],
            min_grade: 2,
            max_grade: 12,
        },
        CatalogEntry {
            id: "avaliacao-diagnostica",
            title: "Avaliação Diagnóstica",
            activity_type: "avaliacao",
            description: "Sondagem do que a turma já sabe sobre o tema",
            subjects: &[],
            min_grade: 1,
            max_grade: 12,
        },
    ]
});

/// All catalog entries.
pub fn entries() -> &'static [CatalogEntry] {
    &CATALOG
}

pub fn find(id: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.id == id)
}

/// Entries matching the optional filters.
///
/// Subject-specific entries come before generic ones.
pub fn search(subject: Option<&str>, grade: Option<&str>) -> Vec<&'static CatalogEntry> {
    let grade = grade.and_then(parse_grade);

    let mut matches: Vec<&CatalogEntry> = CATALOG
        .iter()
        .filter(|e| subject.is_none_or(|s| e.fits_subject(s)))
        .filter(|e| grade.is_none_or(|g| e.fits_grade(g)))
        .collect();

    if let Some(subject) = subject {
        matches.sort_by_key(|e| !e.is_specific_to(subject));
    }
    matches
}

/// School year from phrases like "7º ano", "7", "2ª série" (high school).
pub fn parse_grade(grade: &str) -> Option<u8> {
    let digits: String = grade
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let year: u8 = digits.parse().ok()?;

    let folded = fold(grade);
    if folded.contains("serie") || folded.contains("medio") {
        (1..=3).contains(&year).then_some(year + 9)
    } else {
        (1..=12).contains(&year).then_some(year)
    }
}

/// Lowercase and strip Portuguese diacritics.
pub fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<&str> = entries().iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), entries().len());
    }

    #[test]
    fn specific_entries_first() {
        let results = search(Some("Matemática"), Some("7º ano"));
        assert_eq!(results[0].id, "problemas-contextualizados");
        assert!(results.iter().all(|e| e.id != "tabuada-ilustrada"));
        assert!(results.iter().any(|e| e.id == "quiz-interativo"));
        assert!(results.iter().all(|e| e.id != "linha-do-tempo"));
    }

    #[test]
    fn no_filters_returns_everything() {
        assert_eq!(search(None, None).len(), entries().len());
    }

    #[test]
    fn grade_parsing() {
        assert_eq!(parse_grade("7º ano"), Some(7));
        assert_eq!(parse_grade("9"), Some(9));
        assert_eq!(parse_grade("2ª série"), Some(11));
        assert_eq!(parse_grade("ensino médio"), None);
        assert_eq!(parse_grade("15º ano"), None);
    }

    #[test]
    fn folding() {
        assert_eq!(fold(" Educação Física "), "educacao fisica");
        assert_eq!(fold("Português"), "portugues");
    }
}
