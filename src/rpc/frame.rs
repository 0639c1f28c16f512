//! Length-prefixed message framing and status metadata.
//!
//! ```text
//! +------------+----------------------+-----------------+
//! | flag (u8)  | length (u32, BE)     | message bytes   |
//! +------------+----------------------+-----------------+
//! ```

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::status::{Code, Status};

pub const HEADER_LEN: usize = 5;

pub const GRPC_STATUS: HeaderName = HeaderName::from_static("grpc-status");
pub const GRPC_MESSAGE: HeaderName = HeaderName::from_static("grpc-message");

const FLAG_COMPRESSED: u8 = 1;

/// `grpc-message` keeps printable ASCII except `%`; everything else is escaped.
const MESSAGE_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');

/// Frames one uncompressed message.
pub fn encode(message: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + message.len());
    out.put_u8(0);
    out.put_u32(message.len() as u32);
    out.put_slice(message);
    out.freeze()
}

/// Extracts the single message of a unary request body.
pub fn decode_unary(body: &[u8]) -> Result<&[u8], Status> {
    let Some((header, rest)) = body.split_first_chunk::<HEADER_LEN>() else {
        return Err(Status::internal("request body is missing its message frame"));
    };
    match header[0] {
        0 => {}
        FLAG_COMPRESSED => return Err(Status::unimplemented("compressed messages are not supported")),
        flag => return Err(Status::internal(format!("invalid frame flag {flag}"))),
    }
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    match rest.len() {
        n if n < len => Err(Status::internal("truncated message frame")),
        n if n > len => Err(Status::unimplemented("unary request carried more than one message")),
        _ => Ok(rest),
    }
}

/// Writes `grpc-status` (and `grpc-message` when non-empty) into `headers`.
pub fn put_status(headers: &mut HeaderMap, code: Code, message: &str) {
    headers.insert(GRPC_STATUS, HeaderValue::from(code.to_int()));
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&utf8_percent_encode(message, MESSAGE_ESCAPES).to_string()) {
            headers.insert(GRPC_MESSAGE, value);
        }
    }
}

/// Status metadata for a finished call.
pub fn status_headers(status: &Status) -> HeaderMap {
    let mut headers = HeaderMap::new();
    put_status(&mut headers, status.code(), status.message());
    headers
}

/// Trailers for a call that finished successfully.
pub fn ok_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    put_status(&mut headers, Code::Ok, "");
    headers
}
