//! Line-delimited transport codec for bulb messages.
//!
//! Each message is a single JSON object terminated by `\r\n`. Bulbs are not
//! strict about the carriage return, so a bare `\n` also ends a frame. A
//! line that is not a valid frame is logged and skipped; only I/O failures
//! and oversized lines are errors.
//!
//! Frame format:
//! ```text
//! {"id":1,"result":["ok"]}\r\n
//! {"method":"props","params":{"power":"off"}}\r\n
//! ```

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::protocol::{Command, Frame};

/// Maximum line size (64 KB)
const MAX_LINE_LENGTH: usize = 64 * 1024;

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Codec for `\r\n`-delimited JSON messages
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes already scanned for a terminator
    next_index: usize,
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;

            if end > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong(end));
            }

            let line = src.split_to(end + 1);
            let Ok(text) = std::str::from_utf8(&line[..end]) else {
                warn!("Skipping non UTF-8 line ({end} bytes)");
                continue;
            };
            let text = text.trim();

            // blank keep-alive lines
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str(text) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!("Skipping malformed line {text:?}: {e}"),
            }
        }
    }
}

impl Encoder<Command> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        dst.reserve(json.len() + LINE_TERMINATOR.len());
        dst.put_slice(&json);
        dst.put_slice(LINE_TERMINATOR);

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Line too long: {0} bytes (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),
}
