//! RFC 6455 frame codec.
//!
//! Pure functions over byte slices: [`encode`] builds server frames (never
//! masked) and [`decode`] parses client frames out of a receive buffer,
//! reporting how many bytes it consumed so the caller can slide its buffer.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |   Masking-key, if MASK set    |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```

use crate::close::CloseFrame;
use crate::error::FrameError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7F;
const LENGTH_16: u8 = 126;
const LENGTH_64: u8 = 127;

/// Frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parses the low nibble of the first header byte. Reserved opcodes are
    /// reported as [`FrameError::UnsupportedOpcode`].
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::UnsupportedOpcode(other)),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Masking key the frame arrived with, if any.
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

/// Fixed part of a frame, available before the payload has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
    /// Bytes occupied by the header, extended length and mask key.
    pub header_len: usize,
}

/// Result of a decode attempt on a partially filled buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    /// A whole frame was parsed from the first `consumed` bytes.
    Frame { frame: Frame, consumed: usize },
}

/// Builds an unmasked frame.
pub fn encode(payload: &[u8], opcode: Opcode, fin: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    write_header(&mut out, payload.len(), opcode, fin, 0);
    out.extend_from_slice(payload);
    out
}

/// Builds a masked frame, as a client would send it.
pub fn encode_masked(payload: &[u8], opcode: Opcode, fin: bool, mask: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    write_header(&mut out, payload.len(), opcode, fin, MASK_BIT);
    out.extend_from_slice(&mask);
    let start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[start..], mask);
    out
}

fn write_header(out: &mut Vec<u8>, len: usize, opcode: Opcode, fin: bool, mask_bit: u8) {
    let fin_bit = if fin { FIN_BIT } else { 0 };
    out.push(fin_bit | opcode.as_u8());
    if len <= MAX_CONTROL_PAYLOAD {
        out.push(mask_bit | len as u8);
    } else if let Ok(len) = u16::try_from(len) {
        out.push(mask_bit | LENGTH_16);
        out.extend_from_slice(&len.to_be_bytes());
    } else {
        out.push(mask_bit | LENGTH_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// XORs `payload` in place with the repeating 4-byte `mask`.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Parses the frame header at the start of `buf`.
///
/// Returns `Ok(None)` while the header itself is still incomplete. Control
/// frame constraints are checked here, before any payload is buffered.
pub fn decode_header(buf: &[u8], expect_masked: bool) -> Result<Option<FrameHeader>, FrameError> {
    let &[first, second, ..] = buf else {
        return Ok(None);
    };

    if first & RSV_BITS != 0 {
        return Err(FrameError::ReservedBitsSet);
    }
    let fin = first & FIN_BIT != 0;
    let opcode = Opcode::from_u8(first & OPCODE_BITS)?;
    let masked = second & MASK_BIT != 0;
    if expect_masked && !masked {
        return Err(FrameError::UnmaskedFrame);
    }

    let (payload_len, mut offset) = match second & LENGTH_BITS {
        LENGTH_16 => {
            let Some(bytes) = buf.get(2..4) else {
                return Ok(None);
            };
            (u64::from(u16::from_be_bytes([bytes[0], bytes[1]])), 4)
        }
        LENGTH_64 => {
            let Some(bytes) = buf.get(2..10) else {
                return Ok(None);
            };
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(FrameError::InvalidLength);
            }
            (len, 10)
        }
        short => (u64::from(short), 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLarge(payload_len));
        }
    }

    let mask = if masked {
        let Some(bytes) = buf.get(offset..offset + 4) else {
            return Ok(None);
        };
        offset += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: offset,
    }))
}

/// Decodes one frame from the start of `buf`.
///
/// `expect_masked` is true on the server side, where every client frame must
/// carry a mask. Close payloads are validated (length, code range, UTF-8
/// reason) as part of decoding.
pub fn decode(buf: &[u8], expect_masked: bool) -> Result<Decoded, FrameError> {
    let Some(header) = decode_header(buf, expect_masked)? else {
        return Ok(Decoded::Incomplete);
    };

    let payload_len = usize::try_from(header.payload_len).map_err(|_| FrameError::MessageTooLarge {
        size: header.payload_len,
        max: usize::MAX,
    })?;
    let Some(total) = header.header_len.checked_add(payload_len) else {
        return Err(FrameError::MessageTooLarge {
            size: header.payload_len,
            max: usize::MAX - header.header_len,
        });
    };
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let mut payload = buf[header.header_len..total].to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    if header.opcode == Opcode::Close {
        CloseFrame::parse(&payload)?;
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload,
        },
        consumed: total,
    })
}
