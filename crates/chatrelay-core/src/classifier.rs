//! Frame classification: sentinel, forwardable payload, or ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::reassembler::Frame;

/// Field name marking an SSE data line.
pub const DATA_MARKER: &str = "data:";

/// Payload value that ends the stream.
pub const SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Sentinel,
    Payload(Payload),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// Comment, keep-alive or any frame that is not a data frame.
    NonData,
    /// A data frame with nothing after the marker.
    EmptyData,
    /// A data frame whose payload is not a JSON object.
    Malformed(String),
}

/// A parsed generation delta ready to be forwarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    value: Value,
}

impl Payload {
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Typed view used for diagnostics only.
    pub fn summary(&self) -> Option<CompletionChunk> {
        CompletionChunk::deserialize(&self.value).ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionChunk {
    pub fn first_choice(&self) -> Option<&ChunkChoice> {
        self.choices.first()
    }
}

pub fn classify(frame: &Frame) -> Event {
    let text = frame.as_str().trim_start_matches(['\n', '\r']);
    if !text.starts_with(DATA_MARKER) {
        return Event::Ignored(IgnoreReason::NonData);
    }

    let data = data_payload(text);
    let data = data.trim();
    if data.is_empty() {
        return Event::Ignored(IgnoreReason::EmptyData);
    }
    if data == SENTINEL {
        return Event::Sentinel;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(value) if value.is_object() => Event::Payload(Payload { value }),
        Ok(value) => Event::Ignored(IgnoreReason::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        ))),
        Err(err) => Event::Ignored(IgnoreReason::Malformed(err.to_string())),
    }
}

/// Joins the values of every `data:` line in the frame with `\n`.
fn data_payload(text: &str) -> String {
    text.lines()
        .filter_map(|line| line.strip_prefix(DATA_MARKER))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify_text(text: &str) -> Event {
        classify(&Frame::new(text))
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(classify_text("data: [DONE]"), Event::Sentinel);
        assert_eq!(classify_text("data:[DONE]  "), Event::Sentinel);
        assert_eq!(classify_text("\ndata: [DONE]\r"), Event::Sentinel);
    }

    #[test]
    fn test_payload() {
        let Event::Payload(payload) = classify_text("data: {\"id\":1}") else {
            panic!("expected payload");
        };
        assert_eq!(payload.value(), &json!({"id": 1}));
    }

    #[test]
    fn test_non_data_frames_are_ignored() {
        assert_eq!(
            classify_text(": keep-alive"),
            Event::Ignored(IgnoreReason::NonData)
        );
        assert_eq!(
            classify_text("event: ping"),
            Event::Ignored(IgnoreReason::NonData)
        );
        assert_eq!(classify_text(""), Event::Ignored(IgnoreReason::NonData));
        assert_eq!(
            classify_text("data: "),
            Event::Ignored(IgnoreReason::EmptyData)
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            classify_text("data: {\"id\":"),
            Event::Ignored(IgnoreReason::Malformed(_))
        ));
        assert!(matches!(
            classify_text("data: 42"),
            Event::Ignored(IgnoreReason::Malformed(_))
        ));
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let Event::Payload(payload) = classify_text("data: {\"id\":\ndata: 7}") else {
            panic!("expected payload");
        };
        assert_eq!(payload.value(), &json!({"id": 7}));
    }

    #[test]
    fn test_summary_reads_first_delta() {
        let Event::Payload(payload) = classify_text(
            r#"data: {"id":"chatcmpl-1","choices":[{"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}"#,
        ) else {
            panic!("expected payload");
        };
        let summary = payload.summary().unwrap();
        assert_eq!(summary.id, Some(json!("chatcmpl-1")));
        let choice = summary.first_choice().unwrap();
        let delta = choice.delta.as_ref().unwrap();
        assert_eq!(delta.role.as_deref(), Some("assistant"));
        assert_eq!(delta.content.as_deref(), Some("Hi"));
        assert!(choice.finish_reason.is_none());
    }
}
