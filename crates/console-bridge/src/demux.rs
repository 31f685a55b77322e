//! Decoder for the multiplexed stdio stream of a hijacked exec session.
//!
//! Wire format, per frame:
//!
//! ```text
//! +------+-----------+--------------------+-----------------+
//! | type | 3 padding | u32 BE payload len | payload bytes   |
//! +------+-----------+--------------------+-----------------+
//! ```
//!
//! Chunks arrive with arbitrary boundaries, so the decoder keeps one receive
//! buffer and re-attempts parsing on every chunk.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::metrics;

pub const HEADER_LEN: usize = 8;
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DemuxError {
    #[error("unknown stream type tag {0}")]
    UnknownStreamType(u8),
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream ended inside a frame ({buffered} bytes of it buffered)")]
    Truncated { buffered: usize },
}

/// Encodes one frame in the multiplexed wire format.
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(stream.tag());
    buf.put_bytes(0, 3);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Final, decoded output of one exec session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl AccumulatedOutput {
    pub fn has_error(&self) -> bool {
        !self.stderr.is_empty()
    }

    /// Error text when anything reached stderr, stdout text otherwise.
    pub fn data(&self) -> &str {
        if self.has_error() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    stream: StreamKind,
    len: usize,
}

#[derive(Debug)]
pub struct StreamDemux {
    buf: BytesMut,
    pending: Option<FrameHeader>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    max_frame_len: usize,
    frames: u64,
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            pending: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            max_frame_len,
            frames: 0,
        }
    }

    /// Frames fully decoded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Appends a chunk and decodes every frame it completes. Returns the
    /// number of frames completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<usize, DemuxError> {
        self.buf.extend_from_slice(chunk);
        let mut completed = 0;
        loop {
            match self.pending {
                None => {
                    if self.buf.len() < HEADER_LEN {
                        break;
                    }
                    let tag = self.buf[0];
                    let stream =
                        StreamKind::from_tag(tag).ok_or(DemuxError::UnknownStreamType(tag))?;
                    self.buf.advance(4);
                    let len = self.buf.get_u32() as usize;
                    if len > self.max_frame_len {
                        return Err(DemuxError::FrameTooLarge {
                            len,
                            max: self.max_frame_len,
                        });
                    }
                    self.pending = Some(FrameHeader { stream, len });
                }
                Some(header) => {
                    if self.buf.len() < header.len {
                        break;
                    }
                    let payload = self.buf.split_to(header.len);
                    match header.stream {
                        StreamKind::Stdout => self.stdout.extend_from_slice(&payload),
                        _ => self.stderr.extend_from_slice(&payload),
                    }
                    metrics::record_frame(header.stream, header.len);
                    self.pending = None;
                    self.frames += 1;
                    completed += 1;
                }
            }
        }
        Ok(completed)
    }

    /// Consumes the decoder once the stream has ended.
    pub fn finish(self) -> Result<AccumulatedOutput, DemuxError> {
        if self.pending.is_some() || !self.buf.is_empty() {
            let header = if self.pending.is_some() { HEADER_LEN } else { 0 };
            return Err(DemuxError::Truncated {
                buffered: header + self.buf.len(),
            });
        }
        Ok(AccumulatedOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        })
    }
}
