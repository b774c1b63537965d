use serde_json::{Map, Value};

use super::LlmError;

/// Pull the JSON object out of a model answer.
///
/// Accepts a bare object, an object wrapped in Markdown fences, or an object
/// surrounded by prose (first `{` to last `}`).
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, LlmError> {
    let trimmed = strip_fences(text.trim());

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(obj);
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(LlmError::NoJson);
    };
    if end <= start {
        return Err(LlmError::NoJson);
    }

    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(LlmError::NoJson),
        Err(e) => Err(LlmError::Malformed(e.to_string())),
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
