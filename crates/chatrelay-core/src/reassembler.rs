//! Incremental reassembly of SSE frames from arbitrarily split byte chunks.

use crate::error::DecodeError;

/// Separator between two frames (a blank line).
pub const FRAME_SEPARATOR: &str = "\n\n";

/// One complete protocol unit, without its trailing separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// UTF-8 decoder that holds back an incomplete trailing character until the
/// rest of its bytes arrive.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
    consumed: usize,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, DecodeError> {
        self.pending.extend_from_slice(chunk);

        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(err) => {
                return Err(DecodeError::InvalidUtf8 {
                    offset: self.consumed + err.valid_up_to(),
                });
            }
        };

        let tail = self.pending.split_off(valid);
        let head = std::mem::replace(&mut self.pending, tail);
        let offset = self.consumed;
        self.consumed += valid;

        String::from_utf8(head).map_err(|err| DecodeError::InvalidUtf8 {
            offset: offset + err.utf8_error().valid_up_to(),
        })
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Fail if the input ended in the middle of a character.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            let pending = self.pending.len();
            self.pending.clear();
            Err(DecodeError::TruncatedCharacter { pending })
        }
    }
}

/// Turns a sequence of byte chunks into frames in arrival order.
///
/// The internal buffer always holds exactly the decoded text that has not yet
/// been resolved into a complete frame.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    decoder: Utf8Decoder,
    buffer: String,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, DecodeError> {
        let text = self.decoder.decode(chunk)?;
        self.append(&text);
        Ok(self.drain_frames())
    }

    /// Signal end of input. A non-empty remainder becomes the final frame,
    /// since servers may omit the last separator.
    pub fn finish(&mut self) -> Result<Option<Frame>, DecodeError> {
        self.decoder.finish()?;
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(Frame::new(remainder)))
        }
    }

    /// Text received but not yet emitted as a frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
        // CRLF line endings are folded so the separator search only deals with LF.
        // A lone trailing '\r' stays in the buffer until its '\n' arrives.
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(pos) = self.buffer[start..].find(FRAME_SEPARATOR) {
            frames.push(Frame::new(&self.buffer[start..start + pos]));
            start += pos + FRAME_SEPARATOR.len();
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        frames
    }
}
