//! DAP message framing: `Content-Length` headers followed by a JSON body.

use crate::error::DapError;
use crate::protocol::Message;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length:";

/// Longest header section accepted before the stream is considered lost.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

/// Largest body a `Content-Length` header may announce.
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Encode a message into its wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>, DapError> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Incremental decoder for one connection.
///
/// Bytes are appended with [`feed`](Self::feed); complete frames are pulled
/// out with [`next_message`](Self::next_message) or [`drain`](Self::drain).
/// A trailing partial frame stays buffered until more bytes arrive.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
    lost: bool,
}

impl MessageDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of inbound bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if !self.lost {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Forget all state, for reuse on a fresh connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.lost = false;
    }

    /// Lazily yield every message that is complete in the buffer.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { decoder: self }
    }

    /// Decode the next complete frame, if any.
    ///
    /// A malformed frame yields one recoverable error and the decoder skips
    /// ahead to the next `Content-Length` header. Once a fatal error has
    /// been returned the decoder yields nothing more until [`reset`](Self::reset).
    pub fn next_message(&mut self) -> Option<Result<Message, DapError>> {
        if self.lost {
            return None;
        }

        // Skip junk in front of the next header.
        match find(&self.buffer, CONTENT_LENGTH) {
            Some(0) => {}
            Some(start) => {
                tracing::warn!(skipped = start, "discarding bytes before frame header");
                self.buffer.drain(..start);
            }
            None => {
                // Keep only a tail that could still begin a header.
                let keep = CONTENT_LENGTH.len() - 1;
                if self.buffer.len() > keep {
                    let skipped = self.buffer.len() - keep;
                    tracing::warn!(skipped, "discarding bytes before frame header");
                    self.buffer.drain(..skipped);
                }
                return None;
            }
        }

        let Some(sep) = find(&self.buffer, HEADER_SEPARATOR) else {
            if self.buffer.len() > MAX_HEADER_LEN {
                return Some(Err(self.lose("header section exceeds limit")));
            }
            return None;
        };
        let body_start = sep + HEADER_SEPARATOR.len();

        let length = match parse_content_length(&self.buffer[..sep]) {
            Ok(length) => length,
            Err(err) => {
                self.buffer.drain(..body_start);
                return Some(Err(err));
            }
        };

        let frame_end = match body_start.checked_add(length) {
            Some(end) if length <= MAX_BODY_LEN => end,
            _ => {
                self.buffer.drain(..body_start);
                return Some(Err(DapError::decode(format!(
                    "Content-Length {length} exceeds limit of {MAX_BODY_LEN}"
                ))));
            }
        };
        if self.buffer.len() < frame_end {
            return None;
        }

        let body: Vec<u8> = self.buffer.drain(..frame_end).skip(body_start).collect();
        Some(
            serde_json::from_slice::<Message>(&body)
                .map_err(|e| DapError::decode(format!("invalid message body: {e}"))),
        )
    }

    fn lose(&mut self, reason: &str) -> DapError {
        self.lost = true;
        self.buffer.clear();
        DapError::ProtocolDecode {
            reason: reason.to_string(),
            fatal: true,
        }
    }
}

/// Iterator returned by [`MessageDecoder::drain`].
pub struct Drain<'a> {
    decoder: &'a mut MessageDecoder,
}

impl Iterator for Drain<'_> {
    type Item = Result<Message, DapError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_message()
    }
}

/// Parse the Content-Length value from the header section.
fn parse_content_length(header: &[u8]) -> Result<usize, DapError> {
    let header = std::str::from_utf8(header)
        .map_err(|e| DapError::decode(format!("invalid UTF-8 in header: {e}")))?;
    for line in header.split("\r\n") {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let value = value.trim();
            return value.parse::<usize>().map_err(|e| {
                DapError::decode(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(DapError::decode("missing Content-Length header"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
