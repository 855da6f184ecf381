//! Block codec for target coordinates sent over the acoustic link.
//!
//! A transmission carries four coordinates (lat₁, lon₁, lat₂, lon₂), each
//! packed into three bytes holding the magnitude: whole degrees, hundredths
//! and ten-thousandths of a degree. The hundredths byte only needs values up
//! to 99, so its high bit carries the sign ([`SIGN_BIT`]). The resulting
//! 12-byte payload is split across up to six frames of at most
//! [`MAX_FRAME_LEN`] bytes:
//!
//! - a *header* frame whose first byte holds the number of blocks in its high
//!   nibble; its payload is block 0,
//! - *data* frames whose first byte is the block index `1..=9`.
//!
//! Frames may arrive in any order. Decoding precision is 1e-4 degrees.
//! Latitudes must lie in [-90, 90] and longitudes in [-180, 180].

use thiserror::Error;

use crate::mission::{GeoCoordinate, TargetWaypointPair};

pub const MAX_FRAME_LEN: usize = 14;
pub const PAYLOAD_LEN: usize = 12;
pub const MAX_BLOCKS: usize = 6;
/// Smallest representable step in degrees.
pub const PRECISION_DEG: f64 = 1e-4;

const MAX_INDEX: usize = 9;
/// Set in the hundredths byte of a negative coordinate.
pub const SIGN_BIT: u8 = 0x80;
const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("frame of {0} bytes exceeds 14")]
    FrameTooLong(usize),

    #[error("header announces {0} blocks, expected 1..=6")]
    BlockCount(u8),

    #[error("assembled payload has {0} bytes, expected 12")]
    PayloadLength(usize),

    #[error("coordinate {index} has sub-degree digit {value} > 99")]
    Digit { index: usize, value: u8 },

    #[error("coordinate {0} cannot be encoded (latitude within ±90, longitude within ±180)")]
    Unencodable(f64),

    #[error("coordinate {index} decodes to {value}, beyond ±{limit}")]
    OutOfRange { index: usize, value: f64, limit: f64 },

    #[error("{0} bytes per block cannot carry the payload in 6 frames")]
    BlockSize(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn limit_for(index: usize) -> f64 {
    if index % 2 == 0 { MAX_LATITUDE } else { MAX_LONGITUDE }
}

fn encode_coordinate(value: f64, limit: f64) -> Result<[u8; 3]> {
    if !value.is_finite() || value.abs() > limit {
        return Err(CodecError::Unencodable(value));
    }
    let units = (value.abs() / PRECISION_DEG).round() as u64;
    let whole = units / 10_000;
    let rest = units % 10_000;
    let mut hundredths = (rest / 100) as u8;
    // Values that round to zero are sent unsigned.
    if value < 0.0 && units > 0 {
        hundredths |= SIGN_BIT;
    }
    Ok([whole as u8, hundredths, (rest % 100) as u8])
}

fn decode_coordinate(index: usize, bytes: &[u8]) -> Result<f64> {
    let negative = bytes[1] & SIGN_BIT != 0;
    let hundredths = bytes[1] & !SIGN_BIT;
    for value in [hundredths, bytes[2]] {
        if value > 99 {
            return Err(CodecError::Digit { index, value });
        }
    }
    let magnitude = bytes[0] as f64 + hundredths as f64 * 0.01 + bytes[2] as f64 * PRECISION_DEG;
    let limit = limit_for(index);
    let value = if negative { -magnitude } else { magnitude };
    if magnitude > limit + PRECISION_DEG / 2.0 {
        return Err(CodecError::OutOfRange { index, value, limit });
    }
    Ok(value)
}

/// Pack a waypoint pair into the 12-byte payload.
pub fn encode_payload(pair: &TargetWaypointPair) -> Result<[u8; PAYLOAD_LEN]> {
    let coords = [
        pair.first.latitude,
        pair.first.longitude,
        pair.second.latitude,
        pair.second.longitude,
    ];
    let mut out = [0u8; PAYLOAD_LEN];
    for (i, c) in coords.iter().enumerate() {
        out[i * 3..i * 3 + 3].copy_from_slice(&encode_coordinate(*c, limit_for(i))?);
    }
    Ok(out)
}

pub fn decode_payload(payload: &[u8]) -> Result<TargetWaypointPair> {
    if payload.len() != PAYLOAD_LEN {
        return Err(CodecError::PayloadLength(payload.len()));
    }
    let mut coords = [0.0; 4];
    for (i, chunk) in payload.chunks_exact(3).enumerate() {
        coords[i] = decode_coordinate(i, chunk)?;
    }
    Ok(TargetWaypointPair::new(
        GeoCoordinate::new(coords[0], coords[1]),
        GeoCoordinate::new(coords[2], coords[3]),
    ))
}

/// Split an encoded pair into frames carrying `bytes_per_block` payload bytes.
///
/// The header frame comes first.
pub fn encode_blocks(pair: &TargetWaypointPair, bytes_per_block: usize) -> Result<Vec<Vec<u8>>> {
    if bytes_per_block == 0 || bytes_per_block >= MAX_FRAME_LEN {
        return Err(CodecError::BlockSize(bytes_per_block));
    }
    let payload = encode_payload(pair)?;
    let chunks: Vec<&[u8]> = payload.chunks(bytes_per_block).collect();
    if chunks.len() > MAX_BLOCKS {
        return Err(CodecError::BlockSize(bytes_per_block));
    }

    let mut frames = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let tag = if i == 0 { (chunks.len() as u8) << 4 } else { i as u8 };
        let mut frame = Vec::with_capacity(chunk.len() + 1);
        frame.push(tag);
        frame.extend_from_slice(chunk);
        frames.push(frame);
    }
    Ok(frames)
}

/// Collects frames until a complete payload is available.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    blocks: [Option<Vec<u8>>; MAX_INDEX + 1],
    num_blocks: Option<usize>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one frame. Returns the decoded pair once every announced block has
    /// arrived. A completed or failed assembly starts over.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<TargetWaypointPair>> {
        let Some(&tag) = frame.first() else {
            return Err(CodecError::EmptyFrame);
        };
        if frame.len() > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLong(frame.len()));
        }

        let index = tag as usize;
        if (1..=MAX_INDEX).contains(&index) {
            self.blocks[index] = Some(frame[1..].to_vec());
        } else {
            let count = tag >> 4;
            if count == 0 || count as usize > MAX_BLOCKS {
                self.reset();
                return Err(CodecError::BlockCount(count));
            }
            self.num_blocks = Some(count as usize);
            self.blocks[0] = Some(frame[1..].to_vec());
        }

        let Some(n) = self.num_blocks else {
            return Ok(None);
        };
        if self.blocks[..n].iter().any(Option::is_none) {
            return Ok(None);
        }

        let payload: Vec<u8> = self.blocks[..n].iter().flatten().flatten().copied().collect();
        self.reset();
        decode_payload(&payload).map(Some)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn pending_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }
}
