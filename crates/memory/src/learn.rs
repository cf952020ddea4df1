//! Heuristic preference extraction from teacher requests.
//!
//! Fixed patterns recognize a school subject and a grade level
//! ("7º ano", "2a série"). Matches are lowercased before use; nothing here
//! is guaranteed to be right, it only biases future prompts.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Preference key for the most recently requested subject.
pub const FREQUENT_SUBJECT: &str = "frequent_subject";

/// Preference key for the most recently requested grade.
pub const FREQUENT_GRADE: &str = "frequent_grade";

static SUBJECT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(matem[aá]tica|portugu[eê]s|ci[eê]ncias|hist[oó]ria|geografia|ingl[eê]s|artes|educa[çc][aã]o f[ií]sica)",
    )
    .ok()
});

static GRADE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[º°oa]?\s*(ano|s[eé]rie)").ok());

/// Extract `(key, value)` preferences from a request.
pub fn extract_preferences(request: &str) -> Vec<(&'static str, String)> {
    let text = request.to_lowercase();
    let mut found = Vec::new();

    if let Some(caps) = SUBJECT.as_ref().and_then(|re| re.captures(&text)) {
        found.push((FREQUENT_SUBJECT, caps[1].to_string()));
    }

    if let Some(caps) = GRADE.as_ref().and_then(|re| re.captures(&text)) {
        found.push((FREQUENT_GRADE, format!("{}º {}", &caps[1], &caps[2])));
    }

    found
}
