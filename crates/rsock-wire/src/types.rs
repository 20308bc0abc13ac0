use bitflags::bitflags;

/// Largest stream id either side may allocate.
pub const MAX_STREAM_ID: u32 = (1 << 31) - 1;

/// Frame kinds in the v0 type space. Only a subset is implemented; the rest
/// are recognized so they can be rejected per-stream instead of killing the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    Setup = 0x0001,
    Lease = 0x0002,
    Keepalive = 0x0003,
    RequestResponse = 0x0004,
    RequestFnf = 0x0005,
    RequestStream = 0x0006,
    RequestSub = 0x0007,
    RequestChannel = 0x0008,
    RequestN = 0x0009,
    Cancel = 0x000A,
    Response = 0x000B,
    Error = 0x000C,
    MetadataPush = 0x000D,
    Next = 0x000E,
    Complete = 0x000F,
    NextComplete = 0x0010,
    Ext = 0xFFFF,
}

impl FrameType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0001 => Self::Setup,
            0x0002 => Self::Lease,
            0x0003 => Self::Keepalive,
            0x0004 => Self::RequestResponse,
            0x0005 => Self::RequestFnf,
            0x0006 => Self::RequestStream,
            0x0007 => Self::RequestSub,
            0x0008 => Self::RequestChannel,
            0x0009 => Self::RequestN,
            0x000A => Self::Cancel,
            0x000B => Self::Response,
            0x000C => Self::Error,
            0x000D => Self::MetadataPush,
            0x000E => Self::Next,
            0x000F => Self::Complete,
            0x0010 => Self::NextComplete,
            0xFFFF => Self::Ext,
            _ => return None,
        })
    }
}

bitflags! {
    /// Frame header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        /// A metadata block is present.
        const METADATA = 0x4000;
        /// Payload continues in a following frame.
        const FOLLOWS = 0x2000;
        /// The client requests lease-based flow control (SETUP only).
        const LEASE = 0x1000;
        /// Strict interpretation of the protocol (SETUP only).
        const STRICT = 0x0800;
        /// The receiver must mirror this keepalive back.
        const KEEPALIVE_RESPONSE = 0x0400;
    }
}

/// Wire error codes carried by ERROR frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidSetup = 0x0000_0001,
    UnsupportedSetup = 0x0000_0002,
    RejectedSetup = 0x0000_0003,
    ConnectionError = 0x0000_0101,
    ApplicationError = 0x0000_0201,
    Rejected = 0x0000_0202,
    Canceled = 0x0000_0203,
    Invalid = 0x0000_0204,
    Reserved = 0xFFFF_FFFF,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x0000_0001 => Self::InvalidSetup,
            0x0000_0002 => Self::UnsupportedSetup,
            0x0000_0003 => Self::RejectedSetup,
            0x0000_0101 => Self::ConnectionError,
            0x0000_0201 => Self::ApplicationError,
            0x0000_0202 => Self::Rejected,
            0x0000_0203 => Self::Canceled,
            0x0000_0204 => Self::Invalid,
            0xFFFF_FFFF => Self::Reserved,
            _ => return None,
        })
    }

    /// Setup errors are fatal to the whole connection.
    #[inline]
    pub fn is_setup_error(self) -> bool {
        matches!(self, Self::InvalidSetup | Self::UnsupportedSetup | Self::RejectedSetup)
    }
}

/// Codec failures. `Truncated` is recoverable (keep the partial buffer);
/// everything else is fatal to the connection that produced the bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown frame type 0x{0:04x}")]
    UnknownType(u16),
    #[error("frame type {frame_type:?} on stream {stream_id} is not supported")]
    UnsupportedType { frame_type: FrameType, stream_id: u32 },
    #[error("unknown error code 0x{0:08x}")]
    UnknownErrorCode(u32),
    #[error("declared length {0} is shorter than a frame header")]
    LengthTooShort(u32),
    #[error("declared length {0} exceeds the frame size limit")]
    LengthTooLong(u32),
    #[error("declared length {declared} does not match the buffer ({actual} bytes)")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("metadata length {0} is shorter than its own length field")]
    BadMetadataLength(u32),
    #[error("encoding name is not valid utf-8")]
    BadEncodingName,
    #[error("encoding name longer than 255 bytes")]
    EncodingNameTooLong,
}
