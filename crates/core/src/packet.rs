//! Protocol packet codec.
//!
//! Wire format: `[origin: i32 BE][level: u8][multi-signature bytes]`.
//! The codec only enforces structure; origin and level range checks against
//! the registry size happen where the registry is known.

use crate::HandelError;

/// Bytes preceding the multi-signature payload.
pub const PACKET_HEADER_LEN: usize = 5;

/// A level exchange shipped between participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Dense ID of the sender.
    pub origin: u32,
    /// Level this aggregate is addressed to, `1..=L`.
    pub level: u8,
    /// Serialized `MultiSignature`.
    pub multi_sig: Vec<u8>,
}

impl Packet {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_HEADER_LEN + self.multi_sig.len());
        out.extend_from_slice(&(self.origin as i32).to_be_bytes());
        out.push(self.level);
        out.extend_from_slice(&self.multi_sig);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandelError> {
        if bytes.len() < PACKET_HEADER_LEN {
            return Err(HandelError::MalformedPacket(format!(
                "{} bytes is shorter than the {} byte header",
                bytes.len(),
                PACKET_HEADER_LEN
            )));
        }
        let origin = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if origin < 0 {
            return Err(HandelError::MalformedPacket(format!(
                "negative origin {origin}"
            )));
        }
        Ok(Self {
            origin: origin as u32,
            level: bytes[4],
            multi_sig: bytes[PACKET_HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let packet = Packet {
            origin: 7,
            level: 3,
            multi_sig: vec![1, 2, 3, 4],
        };
        let parsed = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn empty_payload_allowed_by_codec() {
        let packet = Packet {
            origin: 0,
            level: 1,
            multi_sig: vec![],
        };
        let parsed = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert!(parsed.multi_sig.is_empty());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Packet::from_bytes(&[0, 0, 0, 1]).is_err());
    }

    #[test]
    fn rejects_negative_origin() {
        let mut bytes = Packet {
            origin: 1,
            level: 1,
            multi_sig: vec![],
        }
        .to_bytes();
        bytes[0] = 0xFF;
        assert!(Packet::from_bytes(&bytes).is_err());
    }
}
