//! Streaming frame decoder.
//!
//! Bytes are fed in whatever pieces the socket delivers. Data payloads are
//! handed to the [`FrameHandler`] as soon as they arrive; control frames are
//! buffered whole because they may interleave with a fragmented message.

use bytes::{Bytes, BytesMut};

use super::frame::FrameHeader;
use super::mask::apply_mask_at;
use super::opcode::OpCode;
use super::role::Role;
use crate::error::{Error, Result};

/// Hooks called by [`FrameDecoder`].
///
/// `on_message_end` and `on_control_message` return whether decoding should
/// continue. Returning `false` pauses the decoder; the remaining input stays
/// buffered until the next [`FrameDecoder::feed`].
pub trait FrameHandler {
    /// A new data message starts.
    fn on_message_header(&mut self, opcode: OpCode) -> Result<()>;

    /// Unmasked payload bytes at `offset` within the whole message.
    fn on_message_payload(&mut self, offset: u64, data: Bytes) -> Result<()>;

    /// The final fragment of the message has been delivered.
    fn on_message_end(&mut self, size: u64) -> Result<bool>;

    /// A complete control frame.
    fn on_control_message(&mut self, opcode: OpCode, payload: Bytes) -> Result<bool>;
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    ReadingPayload {
        header: FrameHeader,
        received: u64,
        control: Option<BytesMut>,
    },
}

/// Incremental RFC 6455 frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    role: Role,
    accept_unmasked: bool,
    max_frame_size: u64,
    input: BytesMut,
    state: State,
    /// Size so far of the open data message, if any.
    message: Option<u64>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(role: Role, max_frame_size: u64) -> Self {
        Self {
            role,
            accept_unmasked: false,
            max_frame_size,
            input: BytesMut::new(),
            state: State::AwaitingHeader,
            message: None,
        }
    }

    /// Accept unmasked input on a server (non-compliant peers).
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked = accept;
        self
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.input.len()
    }

    /// Whether a fragmented data message is in progress.
    #[must_use]
    pub fn in_message(&self) -> bool {
        self.message.is_some()
    }

    /// Append `data` and decode as far as possible.
    ///
    /// Feeding an empty slice resumes a paused decoder.
    ///
    /// # Errors
    ///
    /// Any framing violation, or an error returned by a hook. The decoder
    /// should not be fed again after an error.
    pub fn feed<H: FrameHandler + ?Sized>(&mut self, data: &[u8], handler: &mut H) -> Result<()> {
        self.input.extend_from_slice(data);
        loop {
            match self.state {
                State::AwaitingHeader => {
                    if !self.read_header(handler)? {
                        return Ok(());
                    }
                }
                State::ReadingPayload { .. } => match self.read_payload(handler)? {
                    Step::Continue => {}
                    Step::NeedInput | Step::Paused => return Ok(()),
                },
            }
        }
    }

    /// Returns `false` when more input is needed.
    fn read_header<H: FrameHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        let (header, header_len) = match FrameHeader::parse(&self.input) {
            Ok(parsed) => parsed,
            Err(Error::IncompleteFrame { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.role
            .check_incoming_mask(header.mask.is_some(), self.accept_unmasked)?;
        header.validate()?;
        if header.payload_len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: self.max_frame_size,
            });
        }

        let control = if header.opcode.is_control() {
            Some(BytesMut::with_capacity(header.payload_len as usize))
        } else if header.opcode.starts_message() {
            if self.message.is_some() {
                return Err(Error::ProtocolViolation(
                    "new data frame while a fragmented message is open".into(),
                ));
            }
            self.message = Some(0);
            handler.on_message_header(header.opcode)?;
            None
        } else {
            if self.message.is_none() {
                return Err(Error::ProtocolViolation(
                    "continuation frame without an open message".into(),
                ));
            }
            None
        };

        let _ = self.input.split_to(header_len);
        self.state = State::ReadingPayload {
            header,
            received: 0,
            control,
        };
        Ok(true)
    }

    fn read_payload<H: FrameHandler + ?Sized>(&mut self, handler: &mut H) -> Result<Step> {
        let State::ReadingPayload {
            header,
            received,
            control,
        } = &mut self.state
        else {
            return Ok(Step::Continue);
        };

        let remaining = header.payload_len - *received;
        let take = remaining.min(self.input.len() as u64) as usize;
        if take > 0 {
            let mut chunk = self.input.split_to(take);
            if let Some(key) = header.mask {
                apply_mask_at(&mut chunk, key, *received);
            }
            *received += take as u64;
            match control {
                Some(buf) => buf.extend_from_slice(&chunk),
                None => {
                    let offset = self.message.unwrap_or(0);
                    self.message = Some(offset + take as u64);
                    handler.on_message_payload(offset, chunk.freeze())?;
                }
            }
        }

        if *received < header.payload_len {
            return Ok(Step::NeedInput);
        }

        let header = *header;
        let control = control.take();
        self.state = State::AwaitingHeader;

        let proceed = match control {
            Some(payload) => handler.on_control_message(header.opcode, payload.freeze())?,
            None if header.fin => {
                let size = self.message.take().unwrap_or(0);
                handler.on_message_end(size)?
            }
            None => true,
        };
        Ok(if proceed { Step::Continue } else { Step::Paused })
    }
}

enum Step {
    Continue,
    NeedInput,
    Paused,
}
