//! Byte-at-a-time frame parser.
//!
//! The parser does not care how the bytes of a frame are chunked, so it can be
//! fed straight from bus reads. Frames with a bad checksum are dropped without
//! reply; the host simply asks again on its next poll.
//!
//! A parser keeps partial state between calls. Call [`Parser::reset`] before
//! feeding the bytes of a new exchange so fragments of two different
//! transactions are never stitched into one frame.

use crate::frame::{Packet, CHECKSUM_LEN, HEADER_LEN, SYNC1, SYNC2};
use crate::id::Route;

/// Largest payload the parser will buffer: a full receive buffer minus framing.
pub const MAX_PAYLOAD_LEN: usize = 512 - HEADER_LEN - CHECKSUM_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    SeekSync1,
    SeekSync2,
    LenLo,
    LenHi,
    MsgIdLo,
    MsgIdHi,
    Src,
    Dst,
    Payload,
    CkLo,
    CkHi,
    MessageReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLong(u16),
    ChecksumMismatch { computed: u16, received: u16 },
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// The byte was consumed and the frame is not complete yet.
    Pending,
    /// A valid frame is available from [`Parser::packet`].
    Ready,
    /// The frame in progress was discarded and the parser is hunting for sync.
    Rejected(ParseError),
}

pub struct Parser {
    state: State,
    payload_len: u16,
    message_id: u16,
    route: Route,
    payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    sum: u16,
    checksum_lo: u8,
    parsed: u32,
    errors: u32,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub const fn new() -> Self {
        Self {
            state: State::SeekSync1,
            payload_len: 0,
            message_id: 0,
            route: Route::new(0, 0),
            payload: heapless::Vec::new(),
            sum: 0,
            checksum_lo: 0,
            parsed: 0,
            errors: 0,
        }
    }

    /// Drop any partial frame. Statistics are kept.
    pub fn reset(&mut self) {
        self.state = State::SeekSync1;
        self.payload.clear();
        self.sum = 0;
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Number of frames that passed the checksum.
    #[inline]
    #[must_use]
    pub const fn parsed(&self) -> u32 {
        self.parsed
    }

    /// Number of frames discarded for length or checksum.
    #[inline]
    #[must_use]
    pub const fn errors(&self) -> u32 {
        self.errors
    }

    /// The frame completed by the last byte, if it was the last byte that
    /// completed one.
    #[must_use]
    pub fn packet(&self) -> Option<Packet<'_>> {
        (self.state == State::MessageReady).then(|| Packet {
            message_id: self.message_id,
            route: self.route,
            payload: &self.payload,
        })
    }

    fn add(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(u16::from(byte));
    }

    fn reject(&mut self, error: ParseError) -> Status {
        self.errors = self.errors.wrapping_add(1);
        self.reset();
        Status::Rejected(error)
    }

    pub fn parse_byte(&mut self, byte: u8) -> Status {
        match self.state {
            State::SeekSync1 | State::MessageReady => {
                self.reset();
                if byte == SYNC1 {
                    self.add(byte);
                    self.state = State::SeekSync2;
                }
            }
            State::SeekSync2 => {
                if byte == SYNC2 {
                    self.add(byte);
                    self.state = State::LenLo;
                } else {
                    // the stray byte may itself start the next frame
                    self.state = State::SeekSync1;
                    return self.parse_byte(byte);
                }
            }
            State::LenLo => {
                self.add(byte);
                self.payload_len = u16::from(byte);
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.add(byte);
                self.payload_len |= u16::from(byte) << 8;
                if usize::from(self.payload_len) > MAX_PAYLOAD_LEN {
                    return self.reject(ParseError::PayloadTooLong(self.payload_len));
                }
                self.state = State::MsgIdLo;
            }
            State::MsgIdLo => {
                self.add(byte);
                self.message_id = u16::from(byte);
                self.state = State::MsgIdHi;
            }
            State::MsgIdHi => {
                self.add(byte);
                self.message_id |= u16::from(byte) << 8;
                self.state = State::Src;
            }
            State::Src => {
                self.add(byte);
                self.route.src = byte;
                self.state = State::Dst;
            }
            State::Dst => {
                self.add(byte);
                self.route.dst = byte;
                self.state = if self.payload_len == 0 {
                    State::CkLo
                } else {
                    State::Payload
                };
            }
            State::Payload => {
                self.add(byte);
                // length was bounded in LenHi, so this cannot overflow
                let _ = self.payload.push(byte);
                if self.payload.len() == usize::from(self.payload_len) {
                    self.state = State::CkLo;
                }
            }
            State::CkLo => {
                self.checksum_lo = byte;
                self.state = State::CkHi;
            }
            State::CkHi => {
                let received = u16::from_le_bytes([self.checksum_lo, byte]);
                if received != self.sum {
                    return self.reject(ParseError::ChecksumMismatch {
                        computed: self.sum,
                        received,
                    });
                }
                self.parsed = self.parsed.wrapping_add(1);
                self.state = State::MessageReady;
                return Status::Ready;
            }
        }

        Status::Pending
    }

    /// Feed bytes until a frame completes. Returns how many bytes were
    /// consumed; the frame, if any, is then available from [`Parser::packet`].
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        for (i, &byte) in bytes.iter().enumerate() {
            if self.parse_byte(byte) == Status::Ready {
                return i + 1;
            }
        }

        bytes.len()
    }
}
