//! Downstream wire formats.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::classifier::Payload;
use crate::error::RelayError;

const SSE_TERMINATOR: &str = "data: [DONE]\n\n";

/// Format used to re-emit forwarded payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// `data: <json>\n\n` frames followed by `data: [DONE]\n\n`.
    #[default]
    Sse,
    /// One JSON value per line, no terminator.
    Ndjson,
}

impl OutputMode {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Sse => "text/event-stream",
            Self::Ndjson => "application/x-ndjson",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Ndjson => "ndjson",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sse" => Ok(Self::Sse),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(RelayError::Config(format!("Unknown output mode '{}'", other))),
        }
    }
}

/// Serializes payloads for the configured output mode.
#[derive(Debug, Clone, Copy)]
pub struct OutputEncoder {
    mode: OutputMode,
}

impl OutputEncoder {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Encode one payload as a complete downstream frame.
    pub fn encode(&self, payload: &Payload) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_string(payload.value())?;
        let frame = match self.mode {
            OutputMode::Sse => format!("data: {}\n\n", json),
            OutputMode::Ndjson => format!("{}\n", json),
        };
        Ok(Bytes::from(frame))
    }

    /// Bytes written after the last payload on a clean completion.
    pub fn terminator(&self) -> Option<Bytes> {
        match self.mode {
            OutputMode::Sse => Some(Bytes::from_static(SSE_TERMINATOR.as_bytes())),
            OutputMode::Ndjson => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Event, classify};
    use crate::reassembler::Frame;

    fn payload(text: &str) -> Payload {
        match classify(&Frame::new(text)) {
            Event::Payload(payload) => payload,
            other => panic!("expected payload, got {:?}", other),
        }
    }

    #[test]
    fn test_sse_encoding() {
        let encoder = OutputEncoder::new(OutputMode::Sse);
        let bytes = encoder.encode(&payload("data: {\"id\":1}")).unwrap();
        assert_eq!(&bytes[..], b"data: {\"id\":1}\n\n");
        assert_eq!(encoder.terminator().unwrap(), Bytes::from_static(b"data: [DONE]\n\n"));
    }

    #[test]
    fn test_ndjson_encoding_has_no_terminator() {
        let encoder = OutputEncoder::new(OutputMode::Ndjson);
        let bytes = encoder.encode(&payload("data: {\"id\":1}")).unwrap();
        assert_eq!(&bytes[..], b"{\"id\":1}\n");
        assert!(encoder.terminator().is_none());
    }

    #[test]
    fn test_reencoding_compacts_and_keeps_key_order() {
        let encoder = OutputEncoder::new(OutputMode::Ndjson);
        let bytes = encoder
            .encode(&payload("data: { \"id\": \"c1\",  \"choices\": [ {\"delta\": {\"content\": \"hi\"}} ], \"created\": 1 }"))
            .unwrap();
        assert_eq!(
            &bytes[..],
            b"{\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"hi\"}}],\"created\":1}\n"
        );
    }

    #[test]
    fn test_output_mode_parsing() {
        assert_eq!("SSE".parse::<OutputMode>().unwrap(), OutputMode::Sse);
        assert_eq!(" ndjson ".parse::<OutputMode>().unwrap(), OutputMode::Ndjson);
        assert_eq!("jsonl".parse::<OutputMode>().unwrap(), OutputMode::Ndjson);
        assert!("websocket".parse::<OutputMode>().is_err());
        assert_eq!(OutputMode::Ndjson.content_type(), "application/x-ndjson");
    }
}
