//! Ping wire framing.
//!
//! ```text
//! ['B']['R'][len_lo][len_hi][id_lo][id_hi][src][dst][payload...][ck_lo][ck_hi]
//! ```
//!
//! The checksum is the 16-bit wrapping sum of every byte from the first sync
//! byte through the last payload byte, sent little-endian.

use generic_array::GenericArray;

use crate::{id::Route, Message};

pub const SYNC1: u8 = b'B';
pub const SYNC2: u8 = b'R';

/// Sync bytes, length, message id, source and destination.
pub const HEADER_LEN: usize = 8;
pub const CHECKSUM_LEN: usize = 2;
/// Bytes a frame occupies beyond its payload.
pub const OVERHEAD: usize = HEADER_LEN + CHECKSUM_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The output buffer cannot hold header, payload and checksum.
    BufferTooSmall { needed: usize, available: usize },
    /// The payload does not fit the 16-bit length field.
    PayloadTooLong(usize),
}

/// Wrapping 16-bit sum used by the frame trailer.
#[inline]
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Write a complete frame into `out` and return its length.
///
/// `out` is left untouched on error.
pub fn build_frame(
    message_id: u16,
    route: Route,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, EncodeError> {
    let payload_len =
        u16::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLong(payload.len()))?;
    let frame_len = OVERHEAD + payload.len();

    if out.len() < frame_len {
        return Err(EncodeError::BufferTooSmall {
            needed: frame_len,
            available: out.len(),
        });
    }

    let [len_lo, len_hi] = payload_len.to_le_bytes();
    let [id_lo, id_hi] = message_id.to_le_bytes();
    out[..HEADER_LEN].copy_from_slice(&[
        SYNC1, SYNC2, len_lo, len_hi, id_lo, id_hi, route.src, route.dst,
    ]);

    let body_end = HEADER_LEN + payload.len();
    out[HEADER_LEN..body_end].copy_from_slice(payload);

    let sum = checksum(&out[..body_end]);
    out[body_end..frame_len].copy_from_slice(&sum.to_le_bytes());

    Ok(frame_len)
}

/// Encode a fixed-size message as a frame. See [`build_frame`].
pub fn encode_message<T: Message>(
    msg: &T,
    route: Route,
    out: &mut [u8],
) -> Result<usize, EncodeError> {
    let mut payload = GenericArray::<u8, T::EncodedLen>::default();
    msg.encode(payload.as_mut_slice());
    build_frame(T::ID, route, &payload, out)
}

/// A checksum-validated frame borrowed from the parser that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet<'a> {
    pub message_id: u16,
    pub route: Route,
    pub payload: &'a [u8],
}
