use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// The single protocol version this codec speaks. A frame carrying any
/// other version fails with [`Error::UnsupportedVersion`]; there is no
/// best-effort parsing across versions.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hard cap on a frame's payload length. Anything larger is rejected
/// before buffering.
pub const MAX_FRAME: usize = 1024 * 1024;

/// `[version:1][kind:1][length:4]`
pub(crate) const HEADER_LEN: usize = 6;

/// Message kind: a command travelling client -> server.
pub(crate) const KIND_COMMAND: u8 = 0x01;
/// Message kind: a response travelling server -> client.
pub(crate) const KIND_RESPONSE: u8 = 0x02;

/// Tries to take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame (the
/// caller should read more bytes). Header violations (wrong version,
/// unknown kind, oversized length) are hard errors and fatal for the
/// connection the bytes came from.
pub fn try_extract(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let version = buf[0];
    if version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let kind = buf[1];
    if kind != KIND_COMMAND && kind != KIND_RESPONSE {
        return Err(Error::codec(format!("unknown message kind 0x{kind:02x}")));
    }
    let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
    if len > MAX_FRAME {
        return Err(Error::codec(format!(
            "frame payload of {len} bytes exceeds the {MAX_FRAME} byte limit"
        )));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    Ok(Some((kind, buf.split_to(len).freeze())))
}

/// Wraps a payload in a frame header. The [`MAX_FRAME`] cap holds on
/// both sides of the wire: a payload the peer's `try_extract` would
/// reject is refused here instead of being sent.
pub(crate) fn enframe(kind: u8, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME {
        return Err(Error::codec(format!(
            "frame payload of {} bytes exceeds the {MAX_FRAME} byte limit",
            payload.len()
        )));
    }
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(kind);
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    Ok(out.freeze())
}
