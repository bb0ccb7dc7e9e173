//! Application messages carried inside `ApplicationMessage` packets.
//!
//! The first byte selects the sub-type; the rest is laid out with
//! [`ByteBuffer`] as follows (integers little-endian):
//!
//! | type | name         | body                                                      |
//! |------|--------------|-----------------------------------------------------------|
//! | 0    | Text         | UTF-8 bytes                                               |
//! | 1    | FileOffer    | u64 size, u16 name length, name, u64 id, optional preview |
//! | 2    | FileRequest  | u64 offer id, u64 request id                              |
//! | 3    | FileChunk    | u64 request id, raw bytes                                 |
//! | 4    | FileDone     | u64 request id                                            |
//! | 5    | FileAck      | u64 request id                                            |

use crate::peer::codec::{ByteBuffer, CodecError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("unknown application message type {0}")]
    UnknownType(u8),

    #[error("file name longer than {} bytes", u16::MAX)]
    NameTooLong,

    #[error("text is not valid UTF-8")]
    InvalidText,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMessage {
    Text(String),
    FileOffer(FileOffer),
    FileRequest { offer_id: u64, request_id: u64 },
    FileChunk { request_id: u64, data: Vec<u8> },
    FileDone { request_id: u64 },
    FileAck { request_id: u64 },
}

impl AppMessage {
    pub fn type_byte(&self) -> u8 {
        match self {
            AppMessage::Text(_) => 0,
            AppMessage::FileOffer(_) => 1,
            AppMessage::FileRequest { .. } => 2,
            AppMessage::FileChunk { .. } => 3,
            AppMessage::FileDone { .. } => 4,
            AppMessage::FileAck { .. } => 5,
        }
    }

    /// Request id for the file-transfer messages that carry one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            AppMessage::FileRequest { request_id, .. }
            | AppMessage::FileChunk { request_id, .. }
            | AppMessage::FileDone { request_id }
            | AppMessage::FileAck { request_id } => Some(*request_id),
            AppMessage::Text(_) | AppMessage::FileOffer(_) => None,
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            AppMessage::Text(text) => text.len(),
            AppMessage::FileOffer(offer) => {
                8 + 2
                    + offer.name.len()
                    + 8
                    + offer.preview.as_deref().map(ByteBuffer::cstr_len).unwrap_or(0)
            }
            AppMessage::FileRequest { .. } => 16,
            AppMessage::FileChunk { data, .. } => 8 + data.len(),
            AppMessage::FileDone { .. } | AppMessage::FileAck { .. } => 8,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let mut buf = ByteBuffer::with_len(self.encoded_len());
        buf.write_u8(self.type_byte())?;
        match self {
            AppMessage::Text(text) => buf.write_bytes(text.as_bytes())?,
            AppMessage::FileOffer(offer) => {
                let name_len =
                    u16::try_from(offer.name.len()).map_err(|_| MessageError::NameTooLong)?;
                buf.write_u64(offer.size)?;
                buf.write_u16(name_len)?;
                buf.write_bytes(offer.name.as_bytes())?;
                buf.write_u64(offer.id)?;
                if let Some(preview) = &offer.preview {
                    buf.write_cstr(preview)?;
                }
            }
            AppMessage::FileRequest {
                offer_id,
                request_id,
            } => {
                buf.write_u64(*offer_id)?;
                buf.write_u64(*request_id)?;
            }
            AppMessage::FileChunk { request_id, data } => {
                buf.write_u64(*request_id)?;
                buf.write_bytes(data)?;
            }
            AppMessage::FileDone { request_id } | AppMessage::FileAck { request_id } => {
                buf.write_u64(*request_id)?;
            }
        }
        Ok(buf.into_inner())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut buf = ByteBuffer::from_bytes(bytes.to_vec());
        let message = match buf.read_u8()? {
            0 => AppMessage::Text(
                String::from_utf8(buf.read_rest()).map_err(|_| MessageError::InvalidText)?,
            ),
            1 => {
                let size = buf.read_u64()?;
                let name_len = buf.read_u16()? as usize;
                let name = String::from_utf8(buf.read_bytes(name_len)?)
                    .map_err(|_| MessageError::InvalidText)?;
                let id = buf.read_u64()?;
                let preview = match buf.peek() {
                    Some(_) => Some(buf.read_cstr()?),
                    None => None,
                };
                AppMessage::FileOffer(FileOffer {
                    id,
                    name,
                    size,
                    preview,
                })
            }
            2 => AppMessage::FileRequest {
                offer_id: buf.read_u64()?,
                request_id: buf.read_u64()?,
            },
            3 => AppMessage::FileChunk {
                request_id: buf.read_u64()?,
                data: buf.read_rest(),
            },
            4 => AppMessage::FileDone {
                request_id: buf.read_u64()?,
            },
            5 => AppMessage::FileAck {
                request_id: buf.read_u64()?,
            },
            other => return Err(MessageError::UnknownType(other)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_survives_encoding() {
        let samples = vec![
            AppMessage::Text("hi there 👋".into()),
            AppMessage::Text(String::new()),
            AppMessage::FileOffer(FileOffer {
                id: 42,
                name: "holiday.jpg".into(),
                size: 3 * 1024 * 1024,
                preview: Some("data:image/png;base64,AAAA".into()),
            }),
            AppMessage::FileOffer(FileOffer {
                id: u64::MAX,
                name: "notes.txt".into(),
                size: 0,
                preview: None,
            }),
            AppMessage::FileRequest {
                offer_id: 42,
                request_id: 7,
            },
            AppMessage::FileChunk {
                request_id: 7,
                data: vec![0, 1, 2, 255],
            },
            AppMessage::FileDone { request_id: 7 },
            AppMessage::FileAck { request_id: 7 },
        ];
        for message in samples {
            let bytes = message.encode().unwrap();
            assert_eq!(bytes[0], message.type_byte());
            assert_eq!(AppMessage::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn file_offer_layout() {
        let bytes = AppMessage::FileOffer(FileOffer {
            id: 1,
            name: "a".into(),
            size: 2,
            preview: None,
        })
        .encode()
        .unwrap();
        assert_eq!(
            bytes,
            vec![1, 2, 0, 0, 0, 0, 0, 0, 0, 1, 0, b'a', 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn truncated_messages_fail_to_decode() {
        assert!(matches!(
            AppMessage::decode(&[2, 1, 0, 0]),
            Err(MessageError::Codec(CodecError::OutOfBounds { .. }))
        ));
        assert!(AppMessage::decode(&[]).is_err());
        // Name length claims more bytes than present.
        assert!(AppMessage::decode(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 9, 0, b'a']).is_err());
    }

    #[test]
    fn unknown_subtype_is_rejected() {
        assert_eq!(
            AppMessage::decode(&[9, 0]),
            Err(MessageError::UnknownType(9))
        );
    }

    #[test]
    fn oversized_name_is_rejected() {
        let offer = AppMessage::FileOffer(FileOffer {
            id: 1,
            name: "n".repeat(70_000),
            size: 1,
            preview: None,
        });
        assert_eq!(offer.encode(), Err(MessageError::NameTooLong));
    }

    #[test]
    fn request_ids() {
        assert_eq!(AppMessage::FileAck { request_id: 3 }.request_id(), Some(3));
        assert_eq!(AppMessage::Text("x".into()).request_id(), None);
    }
}
