//! Newline framing for child-process output streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! child that never writes a newline cannot make the reader buffer without
//! bound. Output arrives in arbitrary chunks; callers append each chunk to a
//! [`BytesMut`] and drain complete lines with [`Decoder::decode`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON line codec with a fixed [`MAX_LINE_BYTES`] limit.
///
/// # Decoder
///
/// Returns `Ok(None)` while no complete line is buffered. Lines longer than
/// the limit return [`AppError::Protocol`]`("line too long: …")`; the codec
/// then discards input up to the next newline and resumes.
///
/// # Encoder
///
/// Encodes `item` as `item\n`. The limit is not enforced when encoding.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }

    /// Drain every complete line currently buffered in `buf`.
    ///
    /// Oversized lines are reported through `on_error` and skipped, so one
    /// bad line never hides the lines that follow it.
    pub fn drain_lines(
        &mut self,
        buf: &mut BytesMut,
        mut on_error: impl FnMut(AppError),
    ) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match self.decode(buf) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(err) => on_error(err),
            }
        }
        lines
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long: exceeded frame limit".to_owned())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
