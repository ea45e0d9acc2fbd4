//! Server-sent-event frame codec.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length and
//! groups lines into frames. A blank line ends a frame; `data:` lines
//! contribute their payload (one optional leading space stripped), comment
//! lines (`:`) and other SSE fields (`event:`, `id:`, `retry:`) are ignored.
//! Multi-line payloads are joined with `\n`.
//!
//! Oversized input is a per-frame problem, not a transport one: the codec
//! yields the error as an item, skips the rest of the offending frame, and
//! resumes at the next blank line, so one bad frame never ends the stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use tokio_util::io::StreamReader;
//! use companion_bridge::events::codec::SseCodec;
//!
//! let frames = FramedRead::new(StreamReader::new(byte_stream), SseCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum length of a single line: 1 MiB.
///
/// A longer line is reported as [`AppError::Decode`]`("line too long: …")`
/// without buffering it.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Maximum accumulated payload of one frame: 8 MiB.
pub const MAX_FRAME_BYTES: usize = 8 * MAX_LINE_BYTES;

const DATA_FIELD: &str = "data:";

/// Decoder yielding one payload per blank-line-terminated frame.
///
/// # Items
///
/// - `Ok(payload)`: the joined `data:` lines of one frame.
/// - `Err(AppError::Decode)`: the frame was dropped because a line exceeded
///   [`MAX_LINE_BYTES`] or the payload exceeded [`MAX_FRAME_BYTES`].
///   Decoding continues with the next frame.
///
/// Frames without any `data:` line (keep-alive comments, bare blank lines)
/// produce nothing.
///
/// # Errors
///
/// The decoder itself fails only with [`AppError::Io`], which ends the
/// stream.
#[derive(Debug)]
pub struct SseCodec {
    lines: LinesCodec,
    payload: Option<String>,
    /// Skipping the remainder of an oversized frame.
    discarding: bool,
}

impl SseCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            payload: None,
            discarding: false,
        }
    }

    /// Feed one line; returns a completed frame on a blank line, or an error
    /// item when the frame grows past [`MAX_FRAME_BYTES`].
    fn accept_line(&mut self, line: &str) -> Option<Result<String>> {
        if line.is_empty() {
            if self.discarding {
                self.discarding = false;
                return None;
            }
            return self.payload.take().map(Ok);
        }

        if self.discarding {
            return None;
        }

        let data = line.strip_prefix(DATA_FIELD)?;
        let data = data.strip_prefix(' ').unwrap_or(data);

        let len = match &mut self.payload {
            Some(payload) => {
                payload.push('\n');
                payload.push_str(data);
                payload.len()
            }
            None => {
                self.payload = Some(data.to_owned());
                data.len()
            }
        };

        if len > MAX_FRAME_BYTES {
            return Some(Err(self.drop_frame(format!(
                "frame too long: exceeded {MAX_FRAME_BYTES} bytes"
            ))));
        }
        None
    }

    /// Abandon the current frame and skip input until its blank line.
    fn drop_frame(&mut self, message: String) -> AppError {
        self.payload = None;
        self.discarding = true;
        AppError::Decode(message)
    }

    /// Pull lines through `next_line` until a frame (or frame error) is
    /// complete.
    fn pump<F>(&mut self, src: &mut BytesMut, mut next_line: F) -> Result<Option<Result<String>>>
    where
        F: FnMut(
            &mut LinesCodec,
            &mut BytesMut,
        ) -> std::result::Result<Option<String>, LinesCodecError>,
    {
        loop {
            match next_line(&mut self.lines, src) {
                Ok(Some(line)) => {
                    if let Some(frame) = self.accept_line(&line) {
                        return Ok(Some(frame));
                    }
                }
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // LinesCodec skips the rest of the line on the next call.
                    return Ok(Some(Err(self.drop_frame(format!(
                        "line too long: exceeded {MAX_LINE_BYTES} bytes"
                    )))));
                }
                Err(LinesCodecError::Io(err)) => return Err(AppError::Io(err.to_string())),
            }
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SseCodec {
    type Item = Result<String>;
    type Error = AppError;

    /// Decode the next frame from `src`.
    ///
    /// Returns `Ok(None)` while the current frame is incomplete (buffering),
    /// `Ok(Some(Ok(payload)))` for a complete frame, and
    /// `Ok(Some(Err(AppError::Decode(..))))` for a frame dropped as oversized.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.pump(src, LinesCodec::decode)
    }

    /// Drain remaining complete frames when the stream reaches EOF.
    ///
    /// A trailing frame without its blank-line terminator is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let frame = self.pump(src, LinesCodec::decode_eof)?;
        if frame.is_none() {
            self.payload = None;
            self.discarding = false;
        }
        Ok(frame)
    }
}
