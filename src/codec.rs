//! # Packet Codec Module
//!
//! Wire protocol between the accelerometer firmware and the host.
//!
//! ## Framing
//! Frames are separated by a single `0x00` delimiter. Inside a frame the
//! payload is byte-stuffed with COBS, so an encoded frame never contains
//! the delimiter.
//!
//! ## Packet Layout
//! | Tag | Packet     | Payload after the tag                          |
//! |-----|------------|------------------------------------------------|
//! | 1   | Sample     | range (u8), x, y, z (i16 little-endian) = 8 B  |
//! | 2   | Error      | UTF-8 diagnostic text                          |
//! | 3   | Set range  | range (u8), host to device only                |
//!
//! Everything here is pure: no I/O, no shared state.

use crate::error::FrameDecodeError;
use crate::history::Sample;
use crate::sensor::Command;

/// Reserved byte separating frames on the wire
pub const FRAME_DELIMITER: u8 = 0x00;

pub const TAG_SAMPLE: u8 = 1;
pub const TAG_ERROR: u8 = 2;
pub const TAG_SET_RANGE: u8 = 3;

/// Total length of a decoded sample packet, tag included
pub const SAMPLE_PACKET_LEN: usize = 8;

/// Longest frame the accumulator buffers before giving up on it
pub const MAX_FRAME_LEN: usize = 1024;

/// Full-scale value of a raw 16-bit reading
const RAW_FULL_SCALE: f64 = 32767.0;

/// Convert a raw reading to g for the given full-scale range
pub fn transform_to_g(value: i16, range: u8) -> f64 {
    range as f64 / RAW_FULL_SCALE * value as f64
}

/// One accelerometer reading as sent by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Full-scale range in g the reading was taken at
    pub range: u8,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl RawSample {
    /// Scale to g using the range carried by this packet
    pub fn to_g(&self) -> Sample {
        Sample::new(
            transform_to_g(self.x, self.range),
            transform_to_g(self.y, self.range),
            transform_to_g(self.z, self.range),
        )
    }

    fn to_payload(self) -> [u8; SAMPLE_PACKET_LEN] {
        let mut payload = [0u8; SAMPLE_PACKET_LEN];
        payload[0] = TAG_SAMPLE;
        payload[1] = self.range;
        payload[2..4].copy_from_slice(&self.x.to_le_bytes());
        payload[4..6].copy_from_slice(&self.y.to_le_bytes());
        payload[6..8].copy_from_slice(&self.z.to_le_bytes());
        payload
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Sample(RawSample),
    /// Diagnostic reported by the device
    Error(String),
    /// Any other tag, or a sample packet of the wrong length. Dropped by
    /// the reader so newer firmware can add packet types.
    Unrecognized { tag: u8, len: usize },
}

/// COBS-encode `data`. The result contains no delimiter byte and does not
/// include the trailing delimiter.
pub fn cobs_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 254 + 2);
    let mut code_idx = 0;
    let mut code: u8 = 1;
    out.push(0);

    for &byte in data {
        if byte == FRAME_DELIMITER {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
            if code == 0xFF {
                out[code_idx] = code;
                code_idx = out.len();
                out.push(0);
                code = 1;
            }
        }
    }

    out[code_idx] = code;
    out
}

/// Undo COBS stuffing on a frame without its delimiter.
///
/// An empty frame decodes to an empty payload.
pub fn cobs_decode(frame: &[u8]) -> Result<Vec<u8>, FrameDecodeError> {
    let mut out = Vec::with_capacity(frame.len());
    let mut idx = 0;

    while idx < frame.len() {
        let code = frame[idx];
        if code == FRAME_DELIMITER {
            return Err(FrameDecodeError::ZeroInFrame { position: idx });
        }
        idx += 1;

        let end = idx + code as usize - 1;
        if end > frame.len() {
            return Err(FrameDecodeError::Truncated {
                expected: code as usize - 1,
                available: frame.len() - idx,
            });
        }

        let block = &frame[idx..end];
        if let Some(offset) = block.iter().position(|&b| b == FRAME_DELIMITER) {
            return Err(FrameDecodeError::ZeroInFrame {
                position: idx + offset,
            });
        }
        out.extend_from_slice(block);
        idx = end;

        if idx < frame.len() && code < 0xFF {
            out.push(FRAME_DELIMITER);
        }
    }

    Ok(out)
}

/// Interpret a decoded payload. Returns `None` for an empty payload.
pub fn parse_packet(payload: &[u8]) -> Option<Packet> {
    let (&tag, body) = payload.split_first()?;

    let packet = match tag {
        TAG_SAMPLE if payload.len() == SAMPLE_PACKET_LEN => Packet::Sample(RawSample {
            range: body[0],
            x: i16::from_le_bytes([body[1], body[2]]),
            y: i16::from_le_bytes([body[3], body[4]]),
            z: i16::from_le_bytes([body[5], body[6]]),
        }),
        TAG_ERROR => Packet::Error(String::from_utf8_lossy(body).into_owned()),
        _ => Packet::Unrecognized {
            tag,
            len: payload.len(),
        },
    };

    Some(packet)
}

/// Decode one frame (delimiter excluded) into a packet
pub fn decode_frame(frame: &[u8]) -> Result<Option<Packet>, FrameDecodeError> {
    let payload = cobs_decode(frame)?;
    Ok(parse_packet(&payload))
}

fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut frame = cobs_encode(payload);
    frame.push(FRAME_DELIMITER);
    frame
}

/// Stuffed, delimiter-terminated frame for an outgoing command
pub fn encode_command(command: &Command) -> Vec<u8> {
    match command {
        Command::SetRange(range) => frame_payload(&[TAG_SET_RANGE, range.value()]),
    }
}

/// Stuffed, delimiter-terminated frame for a sample packet, as the
/// firmware sends it
pub fn encode_sample(sample: &RawSample) -> Vec<u8> {
    frame_payload(&sample.to_payload())
}

/// Stuffed, delimiter-terminated frame for a device error packet
pub fn encode_error(message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(message.len() + 1);
    payload.push(TAG_ERROR);
    payload.extend_from_slice(message.as_bytes());
    frame_payload(&payload)
}

/// Splits a byte stream into frames at the delimiter.
///
/// Partial frames are carried over between calls to `extend`. Empty frames
/// (consecutive delimiters) are skipped. A frame growing past
/// `MAX_FRAME_LEN` is discarded up to the next delimiter.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    overflowed: bool,
    overflow_count: u64,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, calling `on_frame` for every complete frame
    pub fn extend<F>(&mut self, bytes: &[u8], mut on_frame: F)
    where
        F: FnMut(&[u8]),
    {
        for &byte in bytes {
            if byte == FRAME_DELIMITER {
                if self.overflowed {
                    self.overflowed = false;
                } else if !self.buffer.is_empty() {
                    on_frame(&self.buffer);
                }
                self.buffer.clear();
                continue;
            }

            if self.overflowed {
                continue;
            }
            if self.buffer.len() == MAX_FRAME_LEN {
                log::debug!("Discarding frame longer than {} bytes", MAX_FRAME_LEN);
                self.buffer.clear();
                self.overflowed = true;
                self.overflow_count += 1;
                continue;
            }
            self.buffer.push(byte);
        }
    }

    /// Bytes of the frame currently being received
    pub fn partial_len(&self) -> usize {
        self.buffer.len()
    }

    /// Frames discarded for exceeding `MAX_FRAME_LEN`
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }
}
