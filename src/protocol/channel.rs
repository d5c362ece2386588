use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{
    message::{DecodeErr, Message},
    FRAME_DELIMITER, MAX_FRAME_LEN, MAX_LENGTH_DIGITS, READ_CHUNK_SIZE,
};

/// Wraps a byte stream and exchanges whole frames over it
///
/// frames look like `<length>:<type>:<payload>`, where `length` is the decimal
/// byte count of everything after the first delimiter.
pub struct Channel<S> {
    stream: BufReader<S>,
}

#[derive(thiserror::Error, Debug)]
pub enum ChannelErr {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("invalid length prefix: {0:?}")]
    BadLength(String),

    #[error("a frame of {0} bytes exceeds the limit of {} bytes", MAX_FRAME_LEN)]
    FrameTooLong(usize),

    #[error("connection closed in the middle of a length prefix")]
    ClosedInLengthPrefix,

    #[error("connection closed after reading {read} of {expected} bytes")]
    ConnectionClosed { read: usize, expected: usize },

    #[error("{0}")]
    Decode(#[from] DecodeErr),
}

impl ChannelErr {
    /// the peer sent something that can't be a valid frame
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::BadLength(_) | Self::FrameTooLong(_) | Self::Decode(_)
        )
    }

    /// the peer went away while a frame was only partially received
    pub fn is_mid_frame_close(&self) -> bool {
        matches!(
            self,
            Self::ClosedInLengthPrefix | Self::ConnectionClosed { .. }
        )
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Writes a single message as one complete frame
    ///
    /// either the whole frame makes it into the stream, or an error is returned.
    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelErr> {
        let frame = message.encode();

        let mut written = 0;
        while written < frame.len() {
            let wcount = self.stream.write(&frame[written..]).await?;
            if wcount == 0 {
                return Err(tokio::io::Error::new(
                    tokio::io::ErrorKind::WriteZero,
                    "the stream refused to accept the rest of the frame",
                )
                .into());
            }

            written += wcount;
        }

        self.stream.flush().await?;

        Ok(())
    }

    /// Reads a single message from the stream
    ///
    /// returns None if the stream ended cleanly, before the first byte of a frame.
    /// an EOF anywhere inside a frame is reported as an error.
    pub async fn receive(&mut self) -> Result<Option<Message>, ChannelErr> {
        let Some(length) = self.read_length_prefix().await? else {
            return Ok(None);
        };

        if length > MAX_FRAME_LEN {
            return Err(ChannelErr::FrameTooLong(length));
        }

        let body = self.read_body(length).await?;

        Ok(Some(Message::decode_body(body)?))
    }

    /// Shuts down the write half, letting the peer observe a clean EOF
    pub async fn close(mut self) -> Result<(), ChannelErr> {
        self.stream.shutdown().await?;

        Ok(())
    }

    // reads one byte at a time so nothing past the delimiter is consumed here
    async fn read_length_prefix(&mut self) -> Result<Option<usize>, ChannelErr> {
        let mut digits = Vec::with_capacity(MAX_LENGTH_DIGITS);
        let mut byte = [0u8; 1];

        loop {
            let rcount = self.stream.read(&mut byte).await?;
            if rcount == 0 {
                if digits.is_empty() {
                    return Ok(None);
                }

                return Err(ChannelErr::ClosedInLengthPrefix);
            }

            if byte[0] == FRAME_DELIMITER {
                break;
            }

            digits.push(byte[0]);
            if digits.len() > MAX_LENGTH_DIGITS {
                return Err(ChannelErr::BadLength(
                    String::from_utf8_lossy(&digits).into_owned(),
                ));
            }
        }

        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ChannelErr::BadLength(
                String::from_utf8_lossy(&digits).into_owned(),
            ));
        }

        // only ascii digits by now, parsing can fail only on overflow
        let text = String::from_utf8_lossy(&digits);
        let length = text
            .parse()
            .map_err(|_| ChannelErr::BadLength(text.to_string()))?;

        Ok(Some(length))
    }

    async fn read_body(&mut self, length: usize) -> Result<Bytes, ChannelErr> {
        let mut body = BytesMut::with_capacity(length);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        while body.len() < length {
            // never ask for more than what is left of this frame
            let remain = (length - body.len()).min(READ_CHUNK_SIZE);
            let rcount = self.stream.read(&mut chunk[..remain]).await?;
            if rcount == 0 {
                return Err(ChannelErr::ConnectionClosed {
                    read: body.len(),
                    expected: length,
                });
            }

            body.extend_from_slice(&chunk[..rcount]);
        }

        Ok(body.freeze())
    }
}
