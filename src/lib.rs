//! Firmware core for a survey logger on an unmanned surface vessel.
//!
//! A GNSS receiver, a Blue Robotics Ping1D echosounder, a flight controller
//! and a telemetry radio all hang off one UART, routed to one device at a time
//! by an analog multiplexer. This crate provides:
//!
//! - the Ping wire codec: [`frame::build_frame`], the byte-at-a-time
//!   [`Parser`] and typed messages in [`well_known`], decoded through the
//!   [`Response`] sum type;
//! - with the `tasks` feature, the [`bus`] arbiter that serialises every
//!   transaction on the shared line, the [`sensor`] polling loops, the
//!   [`aggregator`] that pairs fixes with depths, and the [`sink`] that
//!   buffers merged records for storage and telemetry.
//!
//! Nothing here allocates. Every buffer and queue has a fixed capacity and the
//! workers are plain `async fn`s meant to be spawned on an embassy executor.

#![no_std]
#![allow(async_fn_in_trait)]

mod buf;
pub mod frame;
pub mod id;
pub mod parser;
pub mod well_known;

#[cfg(feature = "tasks")]
pub mod aggregator;
#[cfg(feature = "tasks")]
pub mod bus;
#[cfg(feature = "tasks")]
pub mod config;
#[cfg(feature = "tasks")]
pub mod sensor;
#[cfg(feature = "tasks")]
pub mod sink;

use generic_array::ArrayLength;

pub use buf::{Buf, BufMut};
pub use frame::{EncodeError, Packet};
pub use generic_array::typenum;
pub use id::Route;
pub use parser::{ParseError, Parser, Status};
pub use well_known::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The payload ended before the last field.
    Truncated,
    /// The frame is valid but not one the caller can handle.
    UnexpectedMessage(u16),
    /// A profile declared more samples than the host buffers.
    ProfileTooLong(u16),
}

/// A Ping message with a fixed-size payload.
pub trait Message {
    /// Message id carried in the frame header.
    const ID: u16;

    /// Payload length in bytes.
    type EncodedLen: ArrayLength;

    /// Write the payload into `buf`, which is exactly `EncodedLen` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Decode the payload. Trailing bytes are ignored so newer firmware may
    /// append fields.
    fn decode(data: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized;
}
