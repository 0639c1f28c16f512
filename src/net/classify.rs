//! Connection classification from a byte prefix.
//!
//! # Responsibilities
//! - Read just enough of a new connection to pick a protocol
//! - Recognise the HTTP/2 client preface
//! - In `content_type` mode, decode the first header block and match its
//!   `content-type` against the configured prefix
//!
//! # Design Decisions
//! - Every byte read lands in the caller's buffer; nothing is consumed
//! - Frames are re-scanned from the start after each read, so no parser
//!   state is carried between reads
//! - Anything that is not a well-formed binary-protocol opening is textual
//! - A header block that panics the HPACK decoder is an `InvalidData` error,
//!   so the connection is dropped and counted as failed

use std::io;
use std::panic::{self, AssertUnwindSafe};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{MatchMode, MuxConfig};

/// HTTP/2 client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;
const PRIORITY_LEN: usize = 5;

/// Where a classified connection goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Binary,
    Textual,
    /// Peer closed before sending anything.
    Empty,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Verdict::Binary => "binary",
            Verdict::Textual => "textual",
            Verdict::Empty => "empty",
        }
    }
}

/// Reads from `stream` into `buf` until the connection can be classified.
///
/// On return `buf` holds every byte read, ready to be replayed to the
/// destination server.
pub async fn classify<R>(stream: &mut R, buf: &mut BytesMut, config: &MuxConfig) -> io::Result<Verdict>
where
    R: AsyncRead + Unpin,
{
    let budget = config.max_classify_bytes.max(PREFACE.len());

    while buf.len() < PREFACE.len() {
        if stream.read_buf(buf).await? == 0 {
            return Ok(if buf.is_empty() { Verdict::Empty } else { Verdict::Textual });
        }
        let seen = buf.len().min(PREFACE.len());
        if buf[..seen] != PREFACE[..seen] {
            return Ok(Verdict::Textual);
        }
    }

    if config.match_mode == MatchMode::Preface {
        return Ok(Verdict::Binary);
    }

    let prefix = config.content_type_prefix.as_bytes();
    loop {
        if let Some(verdict) = inspect_frames(&buf[PREFACE.len()..], prefix) {
            return verdict;
        }
        if buf.len() >= budget {
            tracing::debug!(buffered = buf.len(), "Classification budget exhausted");
            return Ok(Verdict::Textual);
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(Verdict::Textual);
        }
    }
}

/// Scans complete frames after the preface. `None` means more bytes are
/// needed.
fn inspect_frames(frames: &[u8], prefix: &[u8]) -> Option<io::Result<Verdict>> {
    let mut pos = 0;
    let mut block = Vec::new();
    let mut in_headers = false;

    loop {
        let header = frames.get(pos..pos + FRAME_HEADER_LEN)?;
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let kind = header[3];
        let flags = header[4];
        let start = pos + FRAME_HEADER_LEN;
        let payload = frames.get(start..start + len)?;
        pos = start + len;

        match kind {
            FRAME_HEADERS if !in_headers => {
                let Some(fragment) = header_fragment(payload, flags) else {
                    return Some(Ok(Verdict::Textual));
                };
                block.extend_from_slice(fragment);
                in_headers = true;
            }
            FRAME_CONTINUATION if in_headers => block.extend_from_slice(payload),
            // Only CONTINUATION may follow an unfinished header block.
            _ if in_headers => return Some(Ok(Verdict::Textual)),
            _ => continue,
        }

        if flags & FLAG_END_HEADERS != 0 {
            return Some(match_content_type(&block, prefix));
        }
    }
}

/// Strips padding and priority fields from a HEADERS payload.
fn header_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut end = payload.len();
    if flags & FLAG_PADDED != 0 {
        let pad = *payload.first()? as usize;
        start = 1;
        end = end.checked_sub(pad)?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += PRIORITY_LEN;
    }
    payload.get(start..end)
}

fn match_content_type(block: &[u8], prefix: &[u8]) -> io::Result<Verdict> {
    // hpack 0.3 panics on some malformed blocks instead of returning `Err`.
    let decoded = panic::catch_unwind(AssertUnwindSafe(|| hpack::Decoder::new().decode(block)))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "header block crashed the HPACK decoder"))?;
    let headers = match decoded {
        Ok(headers) => headers,
        Err(err) => {
            tracing::debug!(error = ?err, "Undecodable header block");
            return Ok(Verdict::Textual);
        }
    };
    let matched = headers
        .iter()
        .any(|(name, value)| name.as_slice() == b"content-type" && value.starts_with(prefix));
    Ok(if matched { Verdict::Binary } else { Verdict::Textual })
}
