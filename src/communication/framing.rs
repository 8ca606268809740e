//! Frame layer for the step controller link (CRC-8, COBS, zero terminator)
//!
//! Every packet is COBS-encoded so it contains no zero bytes, then followed by
//! a single `0x00` that ends the frame.

use thiserror::Error;

pub const TERMINATOR: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("zero byte inside COBS data at offset {0}")]
    UnexpectedZero(usize),
    #[error("COBS block at offset {offset} runs past the end of the frame")]
    Truncated { offset: usize },
}

/// CRC-8, polynomial 0x07, initial value 0
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// COBS-encode `data`. The result contains no zero bytes and no terminator.
pub fn cobs_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 254 + 2);
    let mut code_idx = 0;
    let mut code = 1u8;
    out.push(0);

    for (i, &b) in data.iter().enumerate() {
        if b == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
            continue;
        }
        out.push(b);
        code += 1;
        // A full block carries no implied zero
        if code == 0xFF && i + 1 < data.len() {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        }
    }
    out[code_idx] = code;
    out
}

/// Decode one COBS frame, terminator already stripped.
pub fn cobs_decode(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == 0 {
            return Err(FrameError::UnexpectedZero(i));
        }
        let start = i + 1;
        let end = i + code as usize;
        if end > data.len() {
            return Err(FrameError::Truncated { offset: i });
        }
        if let Some(pos) = data[start..end].iter().position(|&b| b == 0) {
            return Err(FrameError::UnexpectedZero(start + pos));
        }
        out.extend_from_slice(&data[start..end]);
        i = end;
        if code < 0xFF && i < data.len() {
            out.push(0);
        }
    }
    Ok(out)
}

/// Encode a packet body into a complete frame, terminator included.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = cobs_encode(body);
    frame.push(TERMINATOR);
    frame
}

/// Accumulates bytes read from the link and splits them into frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame without its terminator. Empty frames (line noise
    /// or back-to-back terminators) are skipped.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == TERMINATOR)?;
            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop();
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Bytes of an incomplete frame still waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
