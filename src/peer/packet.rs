//! Data-channel framing: one header byte, then the payload.
//!
//! ```text
//!   bit 7      bits 6..0
//! +---------+-------------+----------------+
//! |encrypted|    type     |  payload ...   |
//! +---------+-------------+----------------+
//! ```

/// Plaintext body of a `GroupOpen` packet.
pub const GROUP_OPEN_PAYLOAD: &[u8] = b"group-open";

const ENCRYPTED_BIT: u8 = 0x80;
const TYPE_MASK: u8 = 0x7f;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type {0}")]
    UnknownType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    ApplicationMessage = 0,
    GroupOpen = 125,
    Welcome = 126,
    KeyPackage = 127,
}

impl PacketKind {
    pub fn is_handshake(self) -> bool {
        !matches!(self, PacketKind::ApplicationMessage)
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketKind::ApplicationMessage),
            125 => Ok(PacketKind::GroupOpen),
            126 => Ok(PacketKind::Welcome),
            127 => Ok(PacketKind::KeyPackage),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Split a header byte into `(encrypted, raw type)`.
pub fn split_header(header: u8) -> (bool, u8) {
    (header & ENCRYPTED_BIT != 0, header & TYPE_MASK)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub encrypted: bool,
    pub kind: PacketKind,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn plaintext(kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            encrypted: false,
            kind,
            payload,
        }
    }

    pub fn sealed(payload: Vec<u8>) -> Self {
        Self {
            encrypted: true,
            kind: PacketKind::ApplicationMessage,
            payload,
        }
    }

    pub fn header(&self) -> u8 {
        let flag = if self.encrypted { ENCRYPTED_BIT } else { 0 };
        flag | (self.kind as u8 & TYPE_MASK)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + self.payload.len());
        frame.push(self.header());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, PacketError> {
        let (&header, payload) = frame.split_first().ok_or(PacketError::Empty)?;
        let (encrypted, kind) = split_header(header);
        Ok(Self {
            encrypted,
            kind: PacketKind::try_from(kind)?,
            payload: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(Packet::sealed(vec![]).header(), 0x80);
        assert_eq!(
            Packet::plaintext(PacketKind::KeyPackage, vec![]).header(),
            0x7f
        );
        assert_eq!(split_header(0xfe), (true, 126));
        assert_eq!(split_header(0x7d), (false, 125));
    }

    #[test]
    fn decode_reads_flag_type_and_payload() {
        let packet = Packet::decode(&[0x80, 1, 2, 3]).unwrap();
        assert!(packet.encrypted);
        assert_eq!(packet.kind, PacketKind::ApplicationMessage);
        assert_eq!(packet.payload, vec![1, 2, 3]);

        let packet = Packet::decode(&[126]).unwrap();
        assert_eq!(packet.kind, PacketKind::Welcome);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::Empty));
        assert_eq!(Packet::decode(&[0x05, 0]), Err(PacketError::UnknownType(5)));
    }

    #[test]
    fn encode_prefixes_header() {
        let frame = Packet::plaintext(PacketKind::GroupOpen, GROUP_OPEN_PAYLOAD.to_vec()).encode();
        assert_eq!(frame[0], 125);
        assert_eq!(&frame[1..], GROUP_OPEN_PAYLOAD);
    }
}
