use std::{fmt, str::FromStr};

use bytes::{Buf, Bytes};

use super::FRAME_DELIMITER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Batch,
    Ack,
    Nack,
    Fin,
    GetWinners,
    Winners,
}

impl MessageType {
    /// The token used for this type on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "BATCH",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Fin => "FIN",
            Self::GetWinners => "GET_WINNERS",
            Self::Winners => "WINNERS",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DecodeErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BATCH" => Ok(Self::Batch),
            "ACK" => Ok(Self::Ack),
            "NACK" => Ok(Self::Nack),
            "FIN" => Ok(Self::Fin),
            "GET_WINNERS" => Ok(Self::GetWinners),
            "WINNERS" => Ok(Self::Winners),
            _ => Err(DecodeErr::UnknownType(s.to_owned())),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeErr {
    #[error("the frame body has no type delimiter")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// A single unit of communication, already stripped of its length prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ty: MessageType,
    pub payload: Bytes,
}

impl Message {
    pub fn new(ty: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            ty,
            payload: payload.into(),
        }
    }

    pub fn ack() -> Self {
        Self::new(MessageType::Ack, "ACK")
    }

    pub fn nack() -> Self {
        Self::new(MessageType::Nack, "NACK")
    }

    pub fn fin() -> Self {
        Self::new(MessageType::Fin, "FIN")
    }

    pub fn batch(records: String) -> Self {
        Self::new(MessageType::Batch, records)
    }

    pub fn get_winners(agency: u32) -> Self {
        Self::new(MessageType::GetWinners, agency.to_string())
    }

    /// comma separated winners, terminated by a newline
    pub fn winners<T: AsRef<str>>(winners: &[T]) -> Self {
        let mut payload = winners
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        payload.push('\n');

        Self::new(MessageType::Winners, payload)
    }

    /// The payload interpreted as UTF-8 text
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Encodes the message into a complete frame: `<length>:<type>:<payload>`
    pub fn encode(&self) -> Vec<u8> {
        let ty = self.ty.as_str().as_bytes();
        let body_len = ty.len() + 1 + self.payload.len();
        let prefix = body_len.to_string();

        let mut frame = Vec::with_capacity(prefix.len() + 1 + body_len);
        frame.extend_from_slice(prefix.as_bytes());
        frame.push(FRAME_DELIMITER);
        frame.extend_from_slice(ty);
        frame.push(FRAME_DELIMITER);
        frame.extend_from_slice(&self.payload);

        frame
    }

    /// Splits a frame body (everything after the length prefix) into a type and a payload
    pub fn decode_body(mut body: Bytes) -> Result<Self, DecodeErr> {
        let Some(idx) = body.iter().position(|byte| *byte == FRAME_DELIMITER) else {
            return Err(DecodeErr::MissingType);
        };

        let ty = body.split_to(idx);
        // drop the delimiter itself
        body.advance(1);

        let ty = match std::str::from_utf8(&ty) {
            Ok(ty) => ty.parse()?,
            Err(_) => {
                return Err(DecodeErr::UnknownType(
                    String::from_utf8_lossy(&ty).into_owned(),
                ))
            }
        };

        Ok(Self { ty, payload: body })
    }
}

/// Decodes the payload of a WINNERS message back into the list of winners
pub fn decode_winners(payload: &str) -> Vec<String> {
    let payload = payload.strip_suffix('\n').unwrap_or(payload);
    if payload.is_empty() {
        return vec![];
    }

    payload.split(',').map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{decode_winners, DecodeErr, Message, MessageType};

    #[test]
    fn encode_frames() {
        let frames = [
            Message::ack().encode(),
            Message::fin().encode(),
            Message::get_winners(3).encode(),
            Message::winners(&["30111222", "27444555"]).encode(),
            Message::winners::<&str>(&[]).encode(),
        ];

        let expected: [&[u8]; 5] = [
            b"7:ACK:ACK",
            b"7:FIN:FIN",
            b"13:GET_WINNERS:3",
            b"26:WINNERS:30111222,27444555\n",
            b"9:WINNERS:\n",
        ];

        for (frame, expected) in frames.iter().zip(expected) {
            assert_eq!(frame.as_slice(), expected);
        }
    }

    #[test]
    fn decode_keeps_delimiters_inside_the_payload() {
        let message = Message::decode_body(Bytes::from_static(b"BATCH:a:b:c\n")).unwrap();
        assert_eq!(message.ty, MessageType::Batch);
        assert_eq!(message.payload, Bytes::from_static(b"a:b:c\n"));

        let message = Message::decode_body(Bytes::from_static(b"FIN:")).unwrap();
        assert_eq!(message.ty, MessageType::Fin);
        assert!(message.payload.is_empty());
    }

    #[test]
    fn decode_bad_bodies() {
        assert_eq!(
            Message::decode_body(Bytes::from_static(b"FIN")),
            Err(DecodeErr::MissingType)
        );
        assert_eq!(
            Message::decode_body(Bytes::from_static(b"HELLO:world")),
            Err(DecodeErr::UnknownType("HELLO".into()))
        );
        // type tokens are case sensitive
        assert_eq!(
            Message::decode_body(Bytes::from_static(b"ack:ACK")),
            Err(DecodeErr::UnknownType("ack".into()))
        );
    }

    #[test]
    fn decode_winner_lists() {
        assert_eq!(decode_winners("1,2,3\n"), ["1", "2", "3"]);
        assert_eq!(decode_winners("42"), ["42"]);
        assert!(decode_winners("\n").is_empty());
        assert!(decode_winners("").is_empty());
    }
}
