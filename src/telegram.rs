// MIT License - Copyright (c) 2026 Peter Wright
// Telegram framing: 0x68 LEN LEN 0x68 CONTROL ADDR PAYLOAD CHECKSUM 0x16

use serde::Serialize;

use crate::constants::{MIN_TELEGRAM_LEN, TELEGRAM_END, TELEGRAM_START};
use crate::error::FrameError;

/// One validated telegram: control field, address field and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Telegram {
    pub control: u8,
    pub address: u8,
    pub payload: Vec<u8>,
}

impl Telegram {
    pub fn new(control: u8, address: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            control,
            address,
            payload: payload.into(),
        }
    }

    /// Encode this telegram into a complete frame.
    pub fn to_frame(&self) -> Vec<u8> {
        encode(self.control, self.address, &self.payload)
    }
}

/// Additive checksum, modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a frame around `control`, `address` and `payload`.
///
/// The length field is a single byte, so payloads longer than 253 bytes
/// cannot be represented; the length is truncated and such a frame will not
/// decode.
pub fn encode(control: u8, address: u8, payload: &[u8]) -> Vec<u8> {
    let length = (2 + payload.len()) as u8;
    let mut frame = Vec::with_capacity(payload.len() + MIN_TELEGRAM_LEN);
    frame.extend_from_slice(&[TELEGRAM_START, length, length, TELEGRAM_START, control, address]);
    frame.extend_from_slice(payload);
    let sum = checksum(&frame[4..]);
    frame.push(sum);
    frame.push(TELEGRAM_END);
    frame
}

/// Validate and decode one complete frame.
///
/// Checks run in a fixed order and the first failure is returned:
/// minimum size, outer markers, length redundancy, secondary start marker,
/// frame size against the declared length, checksum.
pub fn decode(data: &[u8]) -> Result<Telegram, FrameError> {
    if data.len() < MIN_TELEGRAM_LEN {
        return Err(FrameError::Malformed);
    }
    if data[0] != TELEGRAM_START || data[data.len() - 1] != TELEGRAM_END {
        return Err(FrameError::Malformed);
    }

    let length = data[1];
    if length != data[2] {
        return Err(FrameError::LengthMismatch);
    }
    if data[3] != TELEGRAM_START {
        return Err(FrameError::Malformed);
    }

    let length = length as usize;
    if data.len() != length + 6 {
        return Err(FrameError::LengthMismatch);
    }

    let interior = &data[4..4 + length];
    let expected = data[4 + length];
    let calculated = checksum(interior);
    if expected != calculated {
        return Err(FrameError::ChecksumMismatch {
            expected,
            calculated,
        });
    }

    Ok(Telegram {
        control: interior[0],
        address: interior[1],
        payload: interior[2..].to_vec(),
    })
}
