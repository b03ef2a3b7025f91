//! Segment header layout and wire codec.
//!
//! The header matches the original `microtcp_header_t` field-for-field:
//! four 32-bit future-use words were folded down to the three reserved
//! words this crate actually leaves unused (the fourth became the explicit
//! `data_len` field instead of living in `control`).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         seq_number                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         ack_number                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            control            |            window            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          data_len                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       reserved (zero)                        |
//! |                       reserved (zero)                        |
//! |                       reserved (zero)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Fields are little-endian on the wire. Nothing in the reference
//! implementation specified a byte order (it ran the header through memcpy
//! as a native C struct); little-endian was chosen here since it matches
//! the host order of every platform this crate is likely to run on and
//! avoids a swap on the hot path.

use thiserror::Error;

/// Size in bytes of a segment header on the wire.
pub const HEADER_SIZE: usize = 32;

const RESERVED_SIZE: usize = 12;

/// Control bits carried in the header. Modeled as a small bitset type
/// rather than pulling in a bitflags dependency the rest of the crate has
/// no other use for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Control(u16);

impl Control {
    pub const NONE: Control = Control(0);
    pub const WIN: Control = Control(1 << 11);
    pub const ACK: Control = Control(1 << 12);
    pub const RST: Control = Control(1 << 13);
    pub const SYN: Control = Control(1 << 14);
    pub const FIN: Control = Control(1 << 15);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Control {
        Control(bits)
    }

    pub fn contains(self, other: Control) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_syn(self) -> bool {
        self.contains(Control::SYN)
    }

    pub fn is_ack(self) -> bool {
        self.contains(Control::ACK)
    }

    pub fn is_fin(self) -> bool {
        self.contains(Control::FIN)
    }

    pub fn is_rst(self) -> bool {
        self.contains(Control::RST)
    }

    pub fn is_win(self) -> bool {
        self.contains(Control::WIN)
    }
}

impl std::ops::BitOr for Control {
    type Output = Control;
    fn bitor(self, rhs: Control) -> Control {
        Control(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (bit, name) in [
            (Control::SYN, "SYN"),
            (Control::FIN, "FIN"),
            (Control::RST, "RST"),
            (Control::ACK, "ACK"),
            (Control::WIN, "WIN"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// A decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq_number: u32,
    pub ack_number: u32,
    pub control: Control,
    pub window: u16,
    pub data_len: u32,
    pub checksum: u32,
}

/// Failures that can occur while decoding a segment off the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram of {0} bytes is shorter than a header ({HEADER_SIZE} bytes)")]
    Truncated(usize),
    #[error("reserved header bits are non-zero")]
    NonZeroReserved,
    #[error("payload of {0} bytes exceeds the maximum segment size of {1} bytes")]
    PayloadTooLarge(usize, usize),
    #[error("declared data_len {declared} does not match the {actual} bytes actually carried")]
    DataLenMismatch { declared: u32, actual: usize },
}

impl Header {
    fn encode_into(&self, out: &mut [u8; HEADER_SIZE], checksum: u32) {
        out[0..4].copy_from_slice(&self.seq_number.to_le_bytes());
        out[4..8].copy_from_slice(&self.ack_number.to_le_bytes());
        out[8..10].copy_from_slice(&self.control.bits().to_le_bytes());
        out[10..12].copy_from_slice(&self.window.to_le_bytes());
        out[12..16].copy_from_slice(&self.data_len.to_le_bytes());
        out[16..16 + RESERVED_SIZE].fill(0);
        out[28..32].copy_from_slice(&checksum.to_le_bytes());
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header, CodecError> {
        let reserved = &buf[16..16 + RESERVED_SIZE];
        if reserved.iter().any(|&b| b != 0) {
            return Err(CodecError::NonZeroReserved);
        }
        Ok(Header {
            seq_number: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            ack_number: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            control: Control::from_bits(u16::from_le_bytes(buf[8..10].try_into().unwrap())),
            window: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            data_len: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            checksum: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        })
    }
}

/// A segment ready to go on the wire: a header plus a borrowed payload.
/// Borrowing rather than copying the payload mirrors the reference
/// implementation's use of a pointer into the caller's own buffer when
/// building a segment.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> Segment<'a> {
    /// Builds a segment, checking the payload against `mss`. The checksum
    /// field of `header` is ignored and recomputed by [`Segment::serialize_into`].
    pub fn construct(
        seq_number: u32,
        ack_number: u32,
        control: Control,
        window: u16,
        payload: &'a [u8],
        mss: usize,
    ) -> Result<Segment<'a>, CodecError> {
        if payload.len() > mss {
            return Err(CodecError::PayloadTooLarge(payload.len(), mss));
        }
        Ok(Segment {
            header: Header {
                seq_number,
                ack_number,
                control,
                window,
                data_len: payload.len() as u32,
                checksum: 0,
            },
            payload,
        })
    }

    /// Serializes the segment into `out`, which is cleared first. The
    /// checksum is computed over the whole datagram (header with the
    /// checksum field zeroed, followed by the payload) and then patched
    /// into place, matching `segment_io.c`'s zero-compute-patch sequence.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.resize(HEADER_SIZE, 0);
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.header.encode_into(&mut header_bytes, 0);
        out[..HEADER_SIZE].copy_from_slice(&header_bytes);
        out.extend_from_slice(self.payload);

        let checksum = crc32fast::hash(out);
        out[28..32].copy_from_slice(&checksum.to_le_bytes());
    }
}

/// `true` if the datagram's checksum matches its contents. The checksum
/// field is zeroed in place before recomputation and restored afterward,
/// the same in-place zero/recompute/restore trick `receive_ring_buffer.c`'s
/// sibling `segment_io.c` uses instead of allocating a scratch copy.
pub fn validate(buf: &mut [u8]) -> bool {
    if buf.len() < HEADER_SIZE {
        return false;
    }
    let mut saved = [0u8; 4];
    saved.copy_from_slice(&buf[28..32]);
    buf[28..32].fill(0);
    let computed = crc32fast::hash(buf);
    buf[28..32].copy_from_slice(&saved);
    u32::from_le_bytes(saved) == computed
}

/// A header decoded from a datagram, plus the payload slice borrowed from
/// the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

/// Splits a validated datagram into its header and payload. Does not
/// itself check the checksum; callers are expected to have already called
/// [`validate`].
pub fn extract(buf: &[u8]) -> Result<Extracted<'_>, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated(buf.len()));
    }
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&buf[..HEADER_SIZE]);
    let header = Header::decode(&header_bytes)?;

    let payload = &buf[HEADER_SIZE..];
    if header.data_len as usize != payload.len() {
        return Err(CodecError::DataLenMismatch {
            declared: header.data_len,
            actual: payload.len(),
        });
    }
    Ok(Extracted { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_data_segment() {
        let payload = b"hello microtcp";
        let seg = Segment::construct(42, 7, Control::ACK, 8192, payload, 1400).unwrap();
        let mut wire = Vec::new();
        seg.serialize_into(&mut wire);

        assert!(validate(&mut wire));
        let extracted = extract(&wire).unwrap();
        assert_eq!(extracted.header.seq_number, 42);
        assert_eq!(extracted.header.ack_number, 7);
        assert_eq!(extracted.header.control, Control::ACK);
        assert_eq!(extracted.payload, payload);
    }

    #[test]
    fn rejects_corrupted_datagrams() {
        let seg = Segment::construct(1, 0, Control::SYN, 8192, &[], 1400).unwrap();
        let mut wire = Vec::new();
        seg.serialize_into(&mut wire);
        wire[0] ^= 0xff;
        assert!(!validate(&mut wire));
    }

    #[test]
    fn rejects_oversized_payload() {
        let huge = vec![0u8; 2000];
        let err = Segment::construct(1, 0, Control::NONE, 8192, &huge, 1400).unwrap_err();
        assert_eq!(err, CodecError::PayloadTooLarge(2000, 1400));
    }

    #[test]
    fn control_display_lists_set_bits() {
        let c = Control::SYN | Control::ACK;
        assert_eq!(c.to_string(), "SYN|ACK");
        assert_eq!(Control::NONE.to_string(), "NONE");
    }

    #[test]
    fn decode_rejects_nonzero_reserved_bits() {
        let seg = Segment::construct(1, 0, Control::NONE, 8192, &[], 1400).unwrap();
        let mut wire = Vec::new();
        seg.serialize_into(&mut wire);
        wire[16] = 1;
        let checksum = {
            let mut scratch = wire.clone();
            scratch[28..32].fill(0);
            crc32fast::hash(&scratch)
        };
        wire[28..32].copy_from_slice(&checksum.to_le_bytes());
        assert_eq!(extract(&wire).unwrap_err(), CodecError::NonZeroReserved);
    }
}
