//! Replies from tool-style endpoints come back as JSON objects, bare numbers,
//! or free text such as "Post created ID 8031". They are parsed here, once,
//! into a tagged value.

use serde_json::Value as JsonValue;

use crate::AdapterError;

const ID_KEYS: &[&str] = &["id", "ID", "post_id", "term_id", "media_id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReply {
    Id(u64),
    Text(String),
    Error(String),
}

impl ToolReply {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match serde_json::from_str::<JsonValue>(trimmed) {
            Ok(value) => Self::from_json(&value),
            Err(_) => Self::from_text(trimmed),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Number(n) => n
                .as_u64()
                .map(ToolReply::Id)
                .unwrap_or_else(|| ToolReply::Text(n.to_string())),
            JsonValue::String(s) => Self::parse(s),
            JsonValue::Object(map) => {
                if let Some(err) = map.get("error").filter(|e| !e.is_null()) {
                    let message = err
                        .get("message")
                        .and_then(JsonValue::as_str)
                        .or_else(|| err.as_str())
                        .map(ToString::to_string)
                        .unwrap_or_else(|| err.to_string());
                    return ToolReply::Error(message);
                }
                if map.get("success").and_then(JsonValue::as_bool) == Some(false) {
                    let message = map
                        .get("message")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("tool reported failure");
                    return ToolReply::Error(message.to_string());
                }
                for key in ID_KEYS {
                    if let Some(id) = map.get(*key).and_then(json_u64) {
                        return ToolReply::Id(id);
                    }
                }
                if let Some(inner) = map.get("data").or_else(|| map.get("result")) {
                    if let ToolReply::Id(id) = Self::from_json(inner) {
                        return ToolReply::Id(id);
                    }
                }
                ToolReply::Text(value.to_string())
            }
            JsonValue::Array(items) => items
                .iter()
                .find_map(|item| match Self::from_json(item) {
                    ToolReply::Id(id) => Some(ToolReply::Id(id)),
                    _ => None,
                })
                .unwrap_or_else(|| ToolReply::Text(value.to_string())),
            JsonValue::Bool(_) | JsonValue::Null => ToolReply::Text(value.to_string()),
        }
    }

    fn from_text(text: &str) -> Self {
        let lowered = text.to_ascii_lowercase();
        if lowered.starts_with("error") || lowered.starts_with("failed") {
            return ToolReply::Error(text.to_string());
        }
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        for pair in tokens.windows(2) {
            let label = pair[0];
            if label.eq_ignore_ascii_case("id") || label.eq_ignore_ascii_case("term") {
                if let Ok(id) = pair[1].parse::<u64>() {
                    return ToolReply::Id(id);
                }
            }
        }
        ToolReply::Text(text.to_string())
    }

    /// The numeric id, or an error naming what came back instead.
    pub fn into_id(self, provider: &'static str) -> Result<u64, AdapterError> {
        match self {
            ToolReply::Id(id) => Ok(id),
            ToolReply::Error(message) => Err(AdapterError::Rejected {
                provider,
                detail: message,
            }),
            ToolReply::Text(text) => Err(AdapterError::parse(
                provider,
                format!("expected an id, got {text:?}"),
            )),
        }
    }
}

fn json_u64(value: &JsonValue) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
