use serde::Deserialize;
use serde_json::{Map, Value};

use super::fields::{Draft, FIELD_SYNONYMS, Field, WRAPPER_KEYS, normalize_key};

/// The exact reply shape the model is asked for.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct StrictRecord {
    item: String,
    material: String,
    recyclable: bool,
    bin: String,
    notes: String,
    carbon_saved_kg: f64,
}

impl From<StrictRecord> for Draft {
    fn from(record: StrictRecord) -> Self {
        Draft {
            item: Some(record.item),
            material: Some(record.material),
            recyclable: Some(record.recyclable),
            bin: Some(record.bin),
            notes: Some(record.notes),
            carbon_saved_kg: Some(record.carbon_saved_kg),
        }
    }
}

/// Drops a leading ```` ```lang ```` line and a trailing fence.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    if let Some(stripped) = body.trim_end().strip_suffix("```") {
        body = stripped;
    }
    body.trim()
}

/// Texts worth trying as JSON: the fence-stripped reply, then the outermost
/// object span, then the outermost array span.
pub(crate) fn json_candidates(raw: &str) -> Vec<&str> {
    let body = strip_code_fences(raw);
    let mut candidates = vec![body];
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                let span = &body[start..=end];
                if !candidates.contains(&span) {
                    candidates.push(span);
                }
            }
        }
    }
    candidates
}

pub(crate) fn decode_strict(candidate: &str) -> Option<Draft> {
    serde_json::from_str::<StrictRecord>(candidate)
        .ok()
        .map(Draft::from)
}

/// Any JSON carrying at least one recognizable field under any accepted
/// spelling.
pub(crate) fn decode_flexible(candidate: &str) -> Option<Draft> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = first_object(&value)?;
    let draft = draft_from_object(object);
    if !draft.is_empty() {
        return Some(draft);
    }

    let nested = unwrap_one_level(object)?;
    let draft = draft_from_object(&nested);
    (!draft.is_empty()).then_some(draft)
}

fn first_object(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(object) => Some(object),
        Value::Array(items) => items.iter().find_map(Value::as_object),
        _ => None,
    }
}

// A wrapper may hold an object, an array of objects, or a string that is
// itself JSON.
fn unwrap_one_level(object: &Map<String, Value>) -> Option<Map<String, Value>> {
    WRAPPER_KEYS.iter().find_map(|wrapper| {
        let (_, inner) = object
            .iter()
            .find(|(key, _)| normalize_key(key) == *wrapper)?;
        match inner {
            Value::String(text) => {
                let parsed: Value = serde_json::from_str(strip_code_fences(text)).ok()?;
                first_object(&parsed).cloned()
            }
            other => first_object(other).cloned(),
        }
    })
}

fn draft_from_object(object: &Map<String, Value>) -> Draft {
    let mut draft = Draft::default();
    for (field, synonyms) in FIELD_SYNONYMS {
        if let Some(value) = lookup(object, synonyms) {
            apply_value(&mut draft, *field, value);
        }
    }
    draft
}

fn lookup<'a>(object: &'a Map<String, Value>, synonyms: &[&str]) -> Option<&'a Value> {
    synonyms.iter().find_map(|synonym| {
        object
            .iter()
            .find(|(key, value)| normalize_key(key) == *synonym && !value.is_null())
            .map(|(_, value)| value)
    })
}

fn apply_value(draft: &mut Draft, field: Field, value: &Value) {
    match (field, value) {
        (Field::Recyclable, Value::Bool(flag)) => draft.recyclable = Some(*flag),
        (Field::CarbonSavedKg, Value::Number(number)) => draft.carbon_saved_kg = number.as_f64(),
        (_, Value::String(text)) => draft.set_text(field, text),
        (_, Value::Number(number)) => draft.set_text(field, &number.to_string()),
        (_, Value::Bool(flag)) => draft.set_text(field, if *flag { "yes" } else { "no" }),
        (_, Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            draft.set_text(field, &joined);
        }
        _ => {}
    }
}
