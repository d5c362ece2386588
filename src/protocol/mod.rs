pub mod channel;
pub mod message;

pub use channel::{Channel, ChannelErr};
pub use message::{DecodeErr, Message, MessageType};

/// Separates the length prefix from the body, and the type from the payload.
pub const FRAME_DELIMITER: u8 = b':';

// a length prefix longer than this can't be a sane frame
pub const MAX_LENGTH_DIGITS: usize = 10;

pub const MAX_FRAME_LEN: usize = 1 << 20;

pub const READ_CHUNK_SIZE: usize = 1024;
