//! Lenient decoding of JSON embedded in model output.
//!
//! Models wrap JSON in markdown fences, prepend prose, or truncate it.
//! [`decode_lenient`] strips fences, extracts the first balanced object and
//! deserializes it, and tells the caller whether it got real data or had to
//! fall back to a default.

use serde::de::DeserializeOwned;

/// Result of a lenient decode.
#[derive(Debug, Clone, PartialEq)]
pub enum LenientDecode<T> {
    /// The text contained a JSON object that deserialized into `T`.
    Parsed(T),
    /// Nothing usable was found; `value` is the caller's default.
    Fallback { value: T, reason: String },
}

impl<T> LenientDecode<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }
}

/// Strip markdown code fences (```json ... ```) from model output.
fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```JSON", "").replace("```", "")
}

/// Extract the first JSON object from free text.
///
/// Prefers the first brace-balanced span (string literals and escapes are
/// respected). If braces never balance, falls back to the span from the
/// first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<String> {
    let cleaned = strip_fences(text);
    let start = cleaned.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in cleaned[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(cleaned[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }

    let end = cleaned.rfind('}')?;
    (end > start).then(|| cleaned[start..=end].to_string())
}

/// Decode `T` from model output, falling back to `default` on any failure.
pub fn decode_lenient<T, F>(text: &str, default: F) -> LenientDecode<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let Some(candidate) = extract_json_object(text) else {
        return LenientDecode::Fallback {
            value: default(),
            reason: "no JSON object found".into(),
        };
    };

    match serde_json::from_str::<T>(&candidate) {
        Ok(value) => LenientDecode::Parsed(value),
        Err(e) => {
            tracing::debug!(error = %e, "Lenient decode fell back to default");
            LenientDecode::Fallback {
                value: default(),
                reason: e.to_string(),
            }
        }
    }
}
