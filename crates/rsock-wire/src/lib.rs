mod frame;
mod framer;
mod types;

pub use frame::{Body, Frame, HEADER_SIZE, MAX_FRAME_LEN, VERSION};
pub use framer::Framer;
pub use types::{ErrorCode, Flags, FrameError, FrameType, MAX_STREAM_ID};
