//! Frame header and whole-frame codec (RFC 6455 section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::close::CloseFrame;
use super::mask::apply_mask;
use super::opcode::OpCode;
use crate::error::{Error, Result};

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: u64 = 125;

/// Longest possible header: 2 + 8 extended length + 4 mask.
pub const MAX_HEADER_LEN: usize = 14;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1-RSV3 in the low three bits.
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Parse a header from the front of `buf`.
    ///
    /// Returns the header and its encoded length.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if `buf` ends inside the header
    /// - [`Error::ReservedOpcode`] for opcodes 0x3-0x7 and 0xB-0xF
    /// - [`Error::InvalidFrame`] for a 64-bit length with the top bit set
    /// - [`Error::ProtocolViolation`] for a length not in its shortest form
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let [byte0, byte1, rest @ ..] = buf else {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        };

        let fin = byte0 & 0x80 != 0;
        let rsv = (byte0 >> 4) & 0x07;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, ext_len) = match byte1 & 0x7F {
            len @ 0..=125 => (u64::from(len), 0),
            126 => {
                let Some(ext) = rest.first_chunk::<2>() else {
                    return Err(Error::IncompleteFrame {
                        needed: 2 - rest.len(),
                    });
                };
                let len = u16::from_be_bytes(*ext);
                if len <= 125 {
                    return Err(Error::ProtocolViolation(format!(
                        "16-bit length form used for {len} byte payload"
                    )));
                }
                (u64::from(len), 2)
            }
            _ => {
                let Some(ext) = rest.first_chunk::<8>() else {
                    return Err(Error::IncompleteFrame {
                        needed: 8 - rest.len(),
                    });
                };
                let len = u64::from_be_bytes(*ext);
                if len >> 63 != 0 {
                    return Err(Error::InvalidFrame(
                        "most significant bit of 64-bit length set".into(),
                    ));
                }
                if len <= 0xFFFF {
                    return Err(Error::ProtocolViolation(format!(
                        "64-bit length form used for {len} byte payload"
                    )));
                }
                (len, 8)
            }
        };

        let rest = &rest[ext_len..];
        let mask_len = if masked { 4 } else { 0 };
        let mask = if masked {
            let Some(key) = rest.first_chunk::<4>() else {
                return Err(Error::IncompleteFrame {
                    needed: 4 - rest.len(),
                });
            };
            Some(*key)
        } else {
            None
        };

        let header = Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
        };
        Ok((header, 2 + ext_len + mask_len))
    }

    /// Structural rules every frame must satisfy: no RSV bits without an
    /// extension, control frames unfragmented and at most 125 bytes.
    ///
    /// # Errors
    ///
    /// [`Error::ReservedBitsSet`], [`Error::FragmentedControlFrame`] or
    /// [`Error::ControlFrameTooLarge`].
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload_len));
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        header_len(self.payload_len, self.mask.is_some())
    }

    /// Append the encoded header to `dst`.
    pub fn write(&self, dst: &mut impl BufMut) {
        let mut byte0 = self.opcode.as_u8() | ((self.rsv & 0x07) << 4);
        if self.fin {
            byte0 |= 0x80;
        }
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        dst.put_u8(byte0);
        match self.payload_len {
            len @ 0..=125 => dst.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            len => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len);
            }
        }
        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }
}

const fn header_len(payload_len: u64, masked: bool) -> usize {
    let ext = if payload_len <= 125 {
        0
    } else if payload_len <= 0xFFFF {
        2
    } else {
        8
    };
    2 + ext + if masked { 4 } else { 0 }
}

/// A complete frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    #[must_use]
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(true, OpCode::Close, close.to_payload())
    }

    /// Parse one complete frame from the front of `buf`, unmasking the
    /// payload. Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// [`Error::IncompleteFrame`] until the whole frame is in `buf`, or any
    /// header error from [`FrameHeader::parse`].
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, header_len) = FrameHeader::parse(buf)?;
        let payload_len = usize::try_from(header.payload_len).map_err(|_| Error::FrameTooLarge {
            size: header.payload_len,
            max: usize::MAX as u64,
        })?;
        let total = header_len.saturating_add(payload_len);
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = BytesMut::from(&buf[header_len..total]);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok((Self::new(header.fin, header.opcode, payload.freeze()), total))
    }

    /// Header for this frame with the given masking key.
    #[must_use]
    pub fn header(&self, mask: Option<[u8; 4]>) -> FrameHeader {
        FrameHeader {
            fin: self.fin,
            rsv: 0,
            opcode: self.opcode,
            mask,
            payload_len: self.payload.len() as u64,
        }
    }

    /// # Errors
    ///
    /// See [`FrameHeader::validate`].
    pub fn validate(&self) -> Result<()> {
        self.header(None).validate()
    }

    /// Append the encoded frame to `dst`, masking the payload if a key is
    /// given.
    pub fn encode(&self, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        dst.reserve(self.wire_size(mask.is_some()));
        self.header(mask).write(dst);
        let start = dst.len();
        dst.put_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(&mut dst[start..], key);
        }
    }

    #[must_use]
    pub fn to_bytes(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size(mask.is_some()));
        self.encode(mask, &mut buf);
        buf.freeze()
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        header_len(self.payload.len() as u64, masked) + self.payload.len()
    }
}
