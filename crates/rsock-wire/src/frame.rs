use bytes::{Buf, BufMut};

use crate::types::{ErrorCode, Flags, FrameError, FrameType};

/// Protocol version written into SETUP frames.
pub const VERSION: u32 = 0;

/// Fixed header: `length:u32 | type:u16 | flags:u16 | stream_id:u32`.
/// `length` covers the whole frame, header included.
pub const HEADER_SIZE: usize = 12;

/// Upper bound on a single frame. Anything larger is treated as a
/// malformed header rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const METADATA_LEN_SIZE: usize = 4;

/// Kind-specific fixed fields of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Setup {
        version: u32,
        keepalive_ms: u32,
        max_lifetime_ms: u32,
        metadata_encoding: String,
        data_encoding: String,
    },
    Lease {
        ttl_ms: u32,
        budget: u32,
    },
    Keepalive,
    RequestResponse,
    Response,
    Cancel,
    Error {
        code: ErrorCode,
    },
}

impl Body {
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Body::Setup { .. } => FrameType::Setup,
            Body::Lease { .. } => FrameType::Lease,
            Body::Keepalive => FrameType::Keepalive,
            Body::RequestResponse => FrameType::RequestResponse,
            Body::Response => FrameType::Response,
            Body::Cancel => FrameType::Cancel,
            Body::Error { .. } => FrameType::Error,
        }
    }

    fn encoded_len(&self) -> Result<usize, FrameError> {
        Ok(match self {
            Body::Setup { metadata_encoding, data_encoding, .. } => {
                if metadata_encoding.len() > u8::MAX as usize
                    || data_encoding.len() > u8::MAX as usize
                {
                    return Err(FrameError::EncodingNameTooLong);
                }
                12 + 1 + metadata_encoding.len() + 1 + data_encoding.len()
            }
            Body::Lease { .. } => 8,
            Body::Error { .. } => 4,
            Body::Keepalive | Body::RequestResponse | Body::Response | Body::Cancel => 0,
        })
    }
}

/// One decoded wire frame.
///
/// `flags` holds the caller-controlled bits (FOLLOWS, LEASE, STRICT,
/// KEEPALIVE_RESPONSE); METADATA is derived from `metadata` on encode and
/// merged back on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub flags: Flags,
    pub body: Body,
    pub metadata: Option<Vec<u8>>,
    pub data: Option<Vec<u8>>,
}

impl Frame {
    pub fn new(stream_id: u32, body: Body) -> Self {
        Self { stream_id, flags: Flags::empty(), body, metadata: None, data: None }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Vec<u8>>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_data(mut self, data: Option<Vec<u8>>) -> Self {
        self.data = data;
        self
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    /// Serialize to wire bytes, length prefix included.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body_len = self.body.encoded_len()?;
        let metadata_len =
            self.metadata.as_ref().map_or(0, |m| METADATA_LEN_SIZE + m.len());
        let data_len = self.data.as_ref().map_or(0, Vec::len);
        let total = HEADER_SIZE + body_len + metadata_len + data_len;
        if total > MAX_FRAME_LEN {
            return Err(FrameError::LengthTooLong(total as u32));
        }

        let mut flags = self.flags;
        flags.set(Flags::METADATA, self.metadata.is_some());

        let mut buf = Vec::with_capacity(total);
        buf.put_u32(total as u32);
        buf.put_u16(self.frame_type() as u16);
        buf.put_u16(flags.bits());
        buf.put_u32(self.stream_id);

        match &self.body {
            Body::Setup {
                version,
                keepalive_ms,
                max_lifetime_ms,
                metadata_encoding,
                data_encoding,
            } => {
                buf.put_u32(*version);
                buf.put_u32(*keepalive_ms);
                buf.put_u32(*max_lifetime_ms);
                buf.put_u8(metadata_encoding.len() as u8);
                buf.put_slice(metadata_encoding.as_bytes());
                buf.put_u8(data_encoding.len() as u8);
                buf.put_slice(data_encoding.as_bytes());
            }
            Body::Lease { ttl_ms, budget } => {
                buf.put_u32(*ttl_ms);
                buf.put_u32(*budget);
            }
            Body::Error { code } => {
                buf.put_u32(*code as u32);
            }
            Body::Keepalive | Body::RequestResponse | Body::Response | Body::Cancel => {}
        }

        if let Some(metadata) = &self.metadata {
            // the metadata length field counts its own four bytes
            buf.put_u32((METADATA_LEN_SIZE + metadata.len()) as u32);
            buf.put_slice(metadata);
        }
        if let Some(data) = &self.data {
            buf.put_slice(data);
        }

        debug_assert_eq!(buf.len(), total);
        Ok(buf)
    }

    /// Parse a complete frame. `buf` must hold exactly the bytes the length
    /// prefix declares; the framer guarantees that for unframed transports.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated { need: HEADER_SIZE, have: buf.len() });
        }
        let mut cur = buf;
        let declared = cur.get_u32() as usize;
        if declared < HEADER_SIZE {
            return Err(FrameError::LengthTooShort(declared as u32));
        }
        if declared > MAX_FRAME_LEN {
            return Err(FrameError::LengthTooLong(declared as u32));
        }
        if declared != buf.len() {
            return Err(FrameError::LengthMismatch { declared, actual: buf.len() });
        }
        let raw_type = cur.get_u16();
        let mut flags = Flags::from_bits_truncate(cur.get_u16());
        let stream_id = cur.get_u32();

        let frame_type =
            FrameType::from_u16(raw_type).ok_or(FrameError::UnknownType(raw_type))?;

        let body = match frame_type {
            FrameType::Setup => {
                need(&cur, 12)?;
                let version = cur.get_u32();
                let keepalive_ms = cur.get_u32();
                let max_lifetime_ms = cur.get_u32();
                let metadata_encoding = take_name(&mut cur)?;
                let data_encoding = take_name(&mut cur)?;
                Body::Setup { version, keepalive_ms, max_lifetime_ms, metadata_encoding, data_encoding }
            }
            FrameType::Lease => {
                need(&cur, 8)?;
                Body::Lease { ttl_ms: cur.get_u32(), budget: cur.get_u32() }
            }
            FrameType::Error => {
                need(&cur, 4)?;
                let raw = cur.get_u32();
                let code = ErrorCode::from_u32(raw).ok_or(FrameError::UnknownErrorCode(raw))?;
                Body::Error { code }
            }
            FrameType::Keepalive => Body::Keepalive,
            FrameType::RequestResponse => Body::RequestResponse,
            FrameType::Response => Body::Response,
            FrameType::Cancel => Body::Cancel,
            other => return Err(FrameError::UnsupportedType { frame_type: other, stream_id }),
        };

        let metadata = if flags.contains(Flags::METADATA) {
            need(&cur, METADATA_LEN_SIZE)?;
            let len = cur.get_u32();
            // the field counts its own four bytes
            if (len as usize) < METADATA_LEN_SIZE {
                return Err(FrameError::BadMetadataLength(len));
            }
            let body_len = len as usize - METADATA_LEN_SIZE;
            need(&cur, body_len)?;
            let metadata = cur[..body_len].to_vec();
            cur.advance(body_len);
            Some(metadata)
        } else {
            None
        };
        flags.remove(Flags::METADATA);

        let data = if cur.is_empty() { None } else { Some(cur.to_vec()) };

        Ok(Frame { stream_id, flags, body, metadata, data })
    }
}

#[inline]
fn need(cur: &&[u8], n: usize) -> Result<(), FrameError> {
    if cur.remaining() < n {
        Err(FrameError::Truncated { need: n, have: cur.remaining() })
    } else {
        Ok(())
    }
}

fn take_name(cur: &mut &[u8]) -> Result<String, FrameError> {
    need(cur, 1)?;
    let len = cur.get_u8() as usize;
    need(cur, len)?;
    let name =
        std::str::from_utf8(&cur[..len]).map_err(|_| FrameError::BadEncodingName)?.to_owned();
    cur.advance(len);
    Ok(name)
}
