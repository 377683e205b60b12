pub const DEFAULT_PORT: u16 = 5000;

/// Sequence (4) + kind (1) + payload length (2).
pub const HEADER_SIZE: usize = 7;
pub const CHECKSUM_SIZE: usize = 4;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Hard ceiling imposed by the 16-bit length field.
pub const MAX_WIRE_PAYLOAD: usize = u16::MAX as usize;

/// CONTROL payload used by idle connections; swallowed by the receiving pump.
pub const KEEPALIVE: &[u8] = b"PING\n";

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Data = 1,
    Ack = 2,
    Nack = 3,
    Chat = 4,
    Control = 5,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            3 => Some(Self::Nack),
            4 => Some(Self::Chat),
            5 => Some(Self::Control),
            _ => None,
        }
    }

    pub fn channel(self) -> Option<Channel> {
        match self {
            Self::Data => Some(Channel::Data),
            Self::Chat => Some(Channel::Chat),
            Self::Control => Some(Channel::Control),
            Self::Ack | Self::Nack => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Data,
    Chat,
    Control,
}

impl Channel {
    pub fn kind(self) -> PacketKind {
        match self {
            Self::Data => PacketKind::Data,
            Self::Chat => PacketKind::Chat,
            Self::Control => PacketKind::Control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(channel: Channel, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("checksum mismatch: frame carries {carried:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { carried: u32, computed: u32 },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
}

pub fn payload_len(header: &[u8], max_payload: usize) -> Result<usize, FrameError> {
    if header.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            needed: HEADER_SIZE,
            got: header.len(),
        });
    }
    let len = u16::from_be_bytes([header[5], header[6]]) as usize;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }
    Ok(len)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub kind: PacketKind,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(sequence: u32, kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            kind,
            payload,
        }
    }

    pub fn ack(sequence: u32) -> Self {
        Self::new(sequence, PacketKind::Ack, Vec::new())
    }

    pub fn nack(sequence: u32) -> Self {
        Self::new(sequence, PacketKind::Nack, Vec::new())
    }

    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_WIRE_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_WIRE_PAYLOAD,
            });
        }
        Ok(self.encode_unchecked())
    }

    pub(crate) fn encode_unchecked(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.encoded_len());
        frame.extend_from_slice(&self.sequence.to_be_bytes());
        frame.push(self.kind as u8);
        frame.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    /// Decodes exactly one frame. The checksum is verified before the kind
    /// byte is interpreted, so any corruption reports `ChecksumMismatch`.
    pub fn decode(frame: &[u8], max_payload: usize) -> Result<Self, FrameError> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(FrameError::Truncated {
                needed: MIN_FRAME_SIZE,
                got: frame.len(),
            });
        }

        let len = payload_len(frame, max_payload)?;
        let needed = MIN_FRAME_SIZE + len;
        if frame.len() < needed {
            return Err(FrameError::Truncated {
                needed,
                got: frame.len(),
            });
        }

        let body = &frame[..HEADER_SIZE + len];
        let trailer = &frame[HEADER_SIZE + len..needed];
        let carried = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc32fast::hash(body);
        if carried != computed {
            return Err(FrameError::ChecksumMismatch { carried, computed });
        }

        let sequence = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let kind = PacketKind::from_byte(frame[4]).ok_or(FrameError::UnknownKind(frame[4]))?;

        Ok(Self {
            sequence,
            kind,
            payload: body[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_wire_layout() {
        let packet = Packet::new(0x0102_0304, PacketKind::Chat, b"CHAT hi\n".to_vec());
        let frame = packet.encode().unwrap();

        assert_eq!(&frame[..4], &[1, 2, 3, 4]);
        assert_eq!(frame[4], 4);
        assert_eq!(&frame[5..7], &[0, 8]);
        assert_eq!(&frame[7..15], b"CHAT hi\n");

        let crc = crc32fast::hash(&frame[..15]);
        assert_eq!(&frame[15..], &crc.to_be_bytes());
        assert_eq!(frame.len(), packet.encoded_len());
    }

    #[test]
    fn test_decode_recovers_packet() {
        let packet = Packet::new(7, PacketKind::Data, b"FIRE B5\n".to_vec());
        let frame = packet.encode().unwrap();
        assert_eq!(Packet::decode(&frame, 4096).unwrap(), packet);

        let ack = Packet::ack(9).encode().unwrap();
        let decoded = Packet::decode(&ack, 4096).unwrap();
        assert_eq!(decoded.kind, PacketKind::Ack);
        assert_eq!(decoded.sequence, 9);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_every_single_bit_flip_is_detected() {
        let frame = Packet::new(42, PacketKind::Data, b"PLACE A1 H\n".to_vec())
            .encode()
            .unwrap();

        // Bits of the length field are excluded: flipping them changes how
        // many bytes the frame claims, which is reported as truncation or
        // oversize instead.
        for byte in (0..frame.len()).filter(|i| !(5..7).contains(i)) {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        Packet::decode(&corrupted, 4096),
                        Err(FrameError::ChecksumMismatch { .. })
                    ),
                    "flip at byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_length_field_corruption_is_rejected() {
        let frame = Packet::new(1, PacketKind::Data, b"MISS\n".to_vec())
            .encode()
            .unwrap();
        for bit in 0..16 {
            let mut corrupted = frame.clone();
            corrupted[5 + bit / 8] ^= 1 << (bit % 8);
            assert!(Packet::decode(&corrupted, MAX_WIRE_PAYLOAD).is_err());
        }
    }

    #[test]
    fn test_short_input() {
        assert_eq!(
            Packet::decode(&[0, 0, 0], 4096),
            Err(FrameError::Truncated {
                needed: MIN_FRAME_SIZE,
                got: 3
            })
        );
    }

    #[test]
    fn test_oversized_declared_length() {
        let frame = Packet::new(1, PacketKind::Data, vec![b'x'; 100])
            .encode()
            .unwrap();
        assert_eq!(
            Packet::decode(&frame, 64),
            Err(FrameError::PayloadTooLarge { len: 100, max: 64 })
        );
        assert_eq!(
            payload_len(&frame[..HEADER_SIZE], 64),
            Err(FrameError::PayloadTooLarge { len: 100, max: 64 })
        );
    }

    #[test]
    fn test_encode_rejects_payload_beyond_length_field() {
        let packet = Packet::new(1, PacketKind::Data, vec![0; MAX_WIRE_PAYLOAD + 1]);
        assert!(matches!(
            packet.encode(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_with_valid_checksum() {
        let mut frame = Packet::new(3, PacketKind::Data, Vec::new()).encode_unchecked();
        frame[4] = 9;
        let crc = crc32fast::hash(&frame[..HEADER_SIZE]);
        frame[HEADER_SIZE..].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(
            Packet::decode(&frame, 4096),
            Err(FrameError::UnknownKind(9))
        );
    }

    #[test]
    fn test_channel_mapping() {
        assert_eq!(PacketKind::Ack.channel(), None);
        assert_eq!(PacketKind::Nack.channel(), None);
        for channel in [Channel::Data, Channel::Chat, Channel::Control] {
            assert_eq!(channel.kind().channel(), Some(channel));
        }
    }
}
