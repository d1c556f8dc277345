//! Speex stream header parsing and logical packet classification.
//!
//! Every segment is treated as one logical packet: packet 0 is the codec
//! header, packet 1 is the comment packet, everything after that is a voice
//! frame. Packets are never reassembled across pages.

use crate::ogg::FramingError;

/// The codec header packet is exactly this long.
pub const SPEEX_HEADER_SIZE: usize = 80;
/// Samples per frame assumed until a header has been parsed.
pub const DEFAULT_FRAME_SIZE: u32 = 160;

const SPEEX_MAGIC: &[u8; 8] = b"Speex   ";

/// Parsed fields of the 80-byte Speex stream header.
///
/// All multi-byte integers are little-endian; only the low byte of the mode
/// field is meaningful.
#[derive(Debug, Clone)]
pub struct SpeexHeader {
    pub version: String,
    pub version_id: i32,
    pub header_size: i32,
    pub sample_rate: u32,
    pub mode: u8,
    pub mode_bitstream_version: i32,
    pub channels: u32,
    /// -1 means unspecified.
    pub bitrate: i32,
    pub frame_size: u32,
    pub vbr: bool,
    pub frames_per_packet: u32,
    pub extra_headers: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl SpeexHeader {
    pub fn parse(packet: &[u8]) -> Result<Self, FramingError> {
        if packet.len() != SPEEX_HEADER_SIZE {
            return Err(FramingError::HeaderMalformed);
        }
        if &packet[..8] != SPEEX_MAGIC {
            return Err(FramingError::HeaderMalformed);
        }
        let version = String::from_utf8_lossy(&packet[8..28])
            .trim_end_matches('\0')
            .to_string();
        Ok(Self {
            version,
            version_id: read_i32(packet, 28),
            header_size: read_i32(packet, 32),
            sample_rate: read_u32(packet, 36),
            mode: packet[40],
            mode_bitstream_version: read_i32(packet, 44),
            channels: read_u32(packet, 48),
            bitrate: read_i32(packet, 52),
            frame_size: read_u32(packet, 56),
            vbr: read_u32(packet, 60) != 0,
            frames_per_packet: read_u32(packet, 64),
            extra_headers: read_u32(packet, 68),
            reserved1: read_u32(packet, 72),
            reserved2: read_u32(packet, 76),
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// What one logical packet turned out to be.
#[derive(Debug)]
pub enum Classified {
    /// Packet 0 parsed as a codec header; the sink should be (re)initialized
    /// with the discovered sample rate.
    Header(SpeexHeader),
    /// Packet 0 was not a valid header. The index stays at 0 and the next
    /// packet gets another try.
    HeaderRejected,
    /// Packet 1, skipped without inspecting its bytes.
    Comment,
    /// Packet 2 and onward, to be handed to the voice decoder verbatim.
    Voice,
}

/// Assigns a meaning to each logical packet by its position in the stream.
///
/// The index advances once per segment processed, not per page, and starts
/// at 0 for every fresh decode session.
#[derive(Debug, Default)]
pub struct PacketClassifier {
    packet_no: u64,
}

impl PacketClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_no(&self) -> u64 {
        self.packet_no
    }

    pub fn classify(&mut self, payload: &[u8]) -> Classified {
        match self.packet_no {
            0 => match SpeexHeader::parse(payload) {
                Ok(header) => {
                    self.packet_no = 1;
                    Classified::Header(header)
                }
                Err(_) => Classified::HeaderRejected,
            },
            1 => {
                self.packet_no = 2;
                Classified::Comment
            }
            _ => {
                self.packet_no += 1;
                Classified::Voice
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_header_packet(sample_rate: u32, channels: u32, frame_size: u32) -> Vec<u8> {
        let mut packet = vec![0u8; SPEEX_HEADER_SIZE];
        packet[..8].copy_from_slice(b"Speex   ");
        packet[8..17].copy_from_slice(b"speex-1.0");
        packet[28..32].copy_from_slice(&1i32.to_le_bytes()); // version id
        packet[32..36].copy_from_slice(&80i32.to_le_bytes()); // header size
        packet[36..40].copy_from_slice(&sample_rate.to_le_bytes());
        packet[40] = 0; // narrowband
        packet[44..48].copy_from_slice(&4i32.to_le_bytes());
        packet[48..52].copy_from_slice(&channels.to_le_bytes());
        packet[52..56].copy_from_slice(&(-1i32).to_le_bytes()); // bitrate
        packet[56..60].copy_from_slice(&frame_size.to_le_bytes());
        packet[64..68].copy_from_slice(&1u32.to_le_bytes()); // frames per packet
        packet
    }

    #[test]
    fn parses_all_header_fields() {
        let header = SpeexHeader::parse(&sample_header_packet(16000, 1, 160)).unwrap();
        assert_eq!(header.version, "speex-1.0");
        assert_eq!(header.version_id, 1);
        assert_eq!(header.header_size, 80);
        assert_eq!(header.sample_rate, 16000);
        assert_eq!(header.mode, 0);
        assert_eq!(header.mode_bitstream_version, 4);
        assert_eq!(header.channels, 1);
        assert_eq!(header.bitrate, -1);
        assert_eq!(header.frame_size, 160);
        assert!(!header.vbr);
        assert_eq!(header.frames_per_packet, 1);
        assert_eq!(header.extra_headers, 0);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(SpeexHeader::parse(&[0u8; 79]).is_err());
        assert!(SpeexHeader::parse(&[0u8; 81]).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut packet = sample_header_packet(8000, 1, 160);
        packet[0] = b'V';
        assert!(SpeexHeader::parse(&packet).is_err());
    }

    #[test]
    fn classifies_header_comment_then_voice() {
        let mut classifier = PacketClassifier::new();
        assert!(matches!(
            classifier.classify(&sample_header_packet(8000, 1, 160)),
            Classified::Header(_)
        ));
        assert!(matches!(classifier.classify(b"comment"), Classified::Comment));
        assert!(matches!(classifier.classify(b"frame0"), Classified::Voice));
        assert!(matches!(classifier.classify(b"frame1"), Classified::Voice));
        assert_eq!(classifier.packet_no(), 4);
    }

    #[test]
    fn rejected_header_keeps_index_at_zero() {
        let mut classifier = PacketClassifier::new();
        assert!(matches!(
            classifier.classify(b"not a header"),
            Classified::HeaderRejected
        ));
        assert_eq!(classifier.packet_no(), 0);
        // The next packet is interpreted as a header again.
        assert!(matches!(
            classifier.classify(&sample_header_packet(8000, 1, 160)),
            Classified::Header(_)
        ));
        assert_eq!(classifier.packet_no(), 1);
    }
}
