//! Response parsing: recover a field map from free-text model output.
//!
//! Models are told to answer with bare JSON, yet regularly wrap it in
//! ```` ```json ```` fences, prepend a sentence, append a sign-off, nest the
//! object one level deep, or refuse outright. [`parse_response`] tries a fixed
//! sequence of increasingly tolerant decoding stages and never panics:
//!
//! 1. Strip code-fence markers.
//! 2. Text starting with `{` → decode directly.
//! 3. Otherwise (or on failure) → decode the first balanced top-level `{…}`
//!    substring that is valid JSON, honouring string literals and escapes.
//!    Objects nested inside a malformed outer object are never tried.
//! 4. Last resort → decode the greedy span from the first `{` to the last `}`.
//!
//! A decoded object is then normalised against the [`FieldSchema`]: missing
//! keys become unknown, undeclared keys are dropped, placeholder answers
//! (`"null"`, `"N/A"`, the sentinel itself, …) become unknown.

use crate::error::PageError;
use crate::output::{FieldMap, PageOutcome};
use crate::schema::FieldSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Upper bound on `{` positions tried by the balanced scan.
const MAX_BALANCED_CANDIDATES: usize = 32;

/// Answers that mean "not found" regardless of the configured sentinel.
const PLACEHOLDERS: &[&str] = &[
    "null",
    "none",
    "n/a",
    "na",
    "n/d",
    "unknown",
    "não informado",
    "nao informado",
    "não consta",
    "nao consta",
    "não encontrado",
    "-",
    "--",
    "...",
    "valor_extraído_ou_null",
];

/// Parse a raw model answer for page `page_num` (1-indexed).
///
/// Returns [`PageOutcome::Extracted`] with exactly the schema keys, or
/// [`PageOutcome::Failed`] carrying a [`PageError::Parse`] with the raw text.
pub fn parse_response(page_num: usize, raw: &str, schema: &FieldSchema, sentinel: &str) -> PageOutcome {
    match decode_object(raw) {
        Ok(object) => PageOutcome::Extracted {
            fields: normalise_fields(object, schema, sentinel),
        },
        Err(reason) => PageOutcome::Failed {
            error: PageError::Parse {
                page: page_num,
                reason: reason.to_string(),
                raw_response: raw.to_string(),
            },
        },
    }
}

/// `true` when `value` is empty or a placeholder for "not found".
pub fn is_placeholder(value: &str, sentinel: &str) -> bool {
    let v = value.trim();
    if v.is_empty() {
        return true;
    }
    let lower = v.to_lowercase();
    lower == sentinel.trim().to_lowercase() || PLACEHOLDERS.contains(&lower.as_str())
}

// ── Stage 1: Strip fences ────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());

fn strip_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").trim().to_string()
}

// ── Stages 2–4: Decode ───────────────────────────────────────────────────────

fn decode_object(raw: &str) -> Result<Map<String, Value>, &'static str> {
    let cleaned = strip_fences(raw);

    if cleaned.starts_with('{') {
        if let Some(object) = decode_as_object(&cleaned) {
            return Ok(object);
        }
    }

    let candidates = top_level_starts(&cleaned)
        .into_iter()
        .take(MAX_BALANCED_CANDIDATES)
        .filter_map(|start| balanced_object_at(&cleaned, start));
    for candidate in candidates {
        if let Some(object) = decode_as_object(candidate) {
            return Ok(object);
        }
    }

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            decode_as_object(&cleaned[start..=end]).ok_or("found an object-like span but it is not valid JSON")
        }
        _ => Err("no JSON object found in model response"),
    }
}

fn decode_as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte offsets of every `{` not enclosed by an earlier, still-open `{`.
///
/// A value object nested inside a malformed outer object is never a
/// candidate.
fn top_level_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
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
            '{' if depth == 0 => {
                starts.push(offset);
                depth = 1;
            }
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            // Quotes in the prose around the object are not JSON strings.
            '"' if depth > 0 => in_string = true,
            _ => {}
        }
    }
    starts
}

/// The balanced `{…}` substring starting at byte `start`, if it closes.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Normalisation ────────────────────────────────────────────────────────────

fn normalise_fields(object: Map<String, Value>, schema: &FieldSchema, sentinel: &str) -> FieldMap {
    let object = unwrap_nested(object, schema);
    schema
        .keys()
        .map(|key| {
            let value = object.get(key).and_then(|v| normalise_value(v, sentinel));
            (key.to_string(), value)
        })
        .collect()
}

/// `{"candidato": {"nome": ...}}` → the inner object, when the outer object
/// has no schema keys and exactly one object-valued entry that does.
fn unwrap_nested(object: Map<String, Value>, schema: &FieldSchema) -> Map<String, Value> {
    let has_schema_key = |map: &Map<String, Value>| map.keys().any(|k| schema.contains(k));
    if has_schema_key(&object) || object.len() != 1 {
        return object;
    }
    match object.into_iter().next() {
        Some((_, Value::Object(inner))) if has_schema_key(&inner) => inner,
        Some((key, value)) => Map::from_iter([(key, value)]),
        None => Map::new(),
    }
}

fn normalise_value(value: &Value, sentinel: &str) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| normalise_value(item, sentinel))
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(_) => value.to_string(),
    };
    if is_placeholder(&text, sentinel) {
        None
    } else {
        Some(text)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
