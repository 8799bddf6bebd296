//! Staged validation of the model's reply.
//!
//! ```text
//! raw text ──▶ strip fences ──▶ parse JSON ──▶ shape check ──▶ cardinality
//!                              MalformedResponse   Schema        warning
//! ```
//!
//! Each stage has its own failure kind. Nothing is coerced into an empty
//! result: a reply that fails any fatal stage yields an error and no
//! entries.

use crate::error::{AideError, CardinalityWarning};
use crate::form::value_to_cell;
use crate::lifecycle::ResponseEntry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Outer ```` ```json ... ``` ```` wrapping, with or without a language tag,
/// on one line or several.
static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```\s*$").unwrap());

/// Entries aligned to the prompts that were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedResponses {
    /// At most one entry per prompt, in prompt order.
    pub entries: Vec<ResponseEntry>,
    /// Set when the reply's entry count differs from the prompt count.
    pub warning: Option<CardinalityWarning>,
}

/// Validate `raw` against `prompt_count` prompts.
pub fn validate_response(raw: &str, prompt_count: usize) -> Result<ValidatedResponses, AideError> {
    let body = strip_fences(raw);
    let parsed: Value = serde_json::from_str(body).map_err(|e| AideError::MalformedResponse {
        raw: raw.to_string(),
        detail: e.to_string(),
    })?;

    let items = parsed
        .get("responses")
        .ok_or_else(|| AideError::Schema("missing 'responses' field".to_string()))?
        .as_array()
        .ok_or_else(|| AideError::Schema("'responses' is not an array".to_string()))?;

    let mut entries = items
        .iter()
        .enumerate()
        .map(|(i, item)| to_entry(i, item))
        .collect::<Result<Vec<_>, _>>()?;

    let warning = (items.len() != prompt_count).then(|| CardinalityWarning {
        expected: prompt_count,
        received: items.len(),
    });
    if let Some(w) = &warning {
        warn!("{w}");
    }

    entries.truncate(prompt_count);
    debug!("Validated {} response entries", entries.len());
    Ok(ValidatedResponses { entries, warning })
}

/// Remove a surrounding code fence, if any.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_OUTER_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn to_entry(index: usize, item: &Value) -> Result<ResponseEntry, AideError> {
    let obj = item.as_object().ok_or_else(|| {
        AideError::Schema(format!("entry {} in 'responses' is not an object", index + 1))
    })?;
    let field = |name: &str| obj.get(name).map(value_to_cell).unwrap_or_default();
    Ok(ResponseEntry::new(
        field("response"),
        field("source"),
        field("page"),
    ))
}
