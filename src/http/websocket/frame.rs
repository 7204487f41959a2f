//! WebSocket frame codec (RFC 6455 subset).
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key, if MASK set  |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Extensions are not negotiated, so RSV bits are ignored.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(value) => value & 0x0f,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// One decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: usize },

    #[error("control frame must not be fragmented or exceed 125 bytes")]
    InvalidControlFrame,

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,
}

impl FrameError {
    /// Close code sent to the peer when this error ends a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge { .. } => 1009,
            _ => 1002,
        }
    }
}

/// Incremental decoder. Bytes go in with `extend`; `decode` yields a frame
/// only once all of it has arrived.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let b0 = self.buf[0];
        let b1 = self.buf[1];
        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::from_u8(b0);
        let masked = b1 & 0x80 != 0;

        let (payload_len, header_len) = match b1 & 0x7f {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([self.buf[2], self.buf[3]])), 4)
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&self.buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            len => (u64::from(len), 2),
        };

        if opcode.is_control() && (!fin || payload_len > 125) {
            return Err(FrameError::InvalidControlFrame);
        }
        if payload_len > self.max_payload as u64 {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let mask_len = if masked { 4 } else { 0 };
        let payload_start = header_len + mask_len;
        let total = payload_start + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total);
        let mut payload = frame.split_off(payload_start);
        if masked {
            let mask = [
                frame[header_len],
                frame[header_len + 1],
                frame[header_len + 2],
                frame[header_len + 3],
            ];
            apply_mask(&mut payload, mask);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// XOR `data` with the 4-byte mask key in place.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode one frame. Servers send unmasked frames (`mask: None`).
pub fn encode_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 14);
    out.put_u8(if fin { 0x80 } else { 0 } | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        len if len < 126 => out.put_u8(mask_bit | len as u8),
        len if len <= usize::from(u16::MAX) => {
            out.put_u8(mask_bit | 126);
            out.put_u16(len as u16);
        }
        len => {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }
    }

    match mask {
        Some(mask) => {
            out.put_slice(&mask);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], mask);
        }
        None => out.put_slice(payload),
    }
    out.freeze()
}

/// Split a close payload into `(code, reason)`. Payloads shorter than two
/// bytes mean 1000 with an empty reason.
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (1000, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (code, reason)
}

/// Build a close payload. The reason is cut at a character boundary so the
/// frame stays within the 125-byte control frame limit.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(123);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// A complete data message after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: OpCode,
    pub payload: Bytes,
}

/// Joins fragmented data frames into messages.
#[derive(Debug)]
pub struct MessageAssembler {
    partial: Option<(OpCode, BytesMut)>,
    max_message: usize,
}

impl MessageAssembler {
    pub fn new(max_message: usize) -> Self {
        Self {
            partial: None,
            max_message,
        }
    }

    /// Feed one data frame. Returns the message once its final frame arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            OpCode::Continuation => {
                let Some((_, buf)) = self.partial.as_mut() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                let size = buf.len() + frame.payload.len();
                if size > self.max_message {
                    return Err(FrameError::TooLarge {
                        size: size as u64,
                        max: self.max_message,
                    });
                }
                buf.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                Ok(self.partial.take().map(|(opcode, buf)| Message {
                    opcode,
                    payload: buf.freeze(),
                }))
            }
            opcode => {
                if self.partial.is_some() {
                    return Err(FrameError::InterleavedMessage);
                }
                if frame.fin {
                    return Ok(Some(Message {
                        opcode,
                        payload: frame.payload,
                    }));
                }
                self.partial = Some((opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
        }
    }
}
