//! Ping protocol message identifiers.
//!
//! Identifiers 0..=99 are common to every Blue Robotics device, 1000..=1999
//! belong to the Ping1D echosounder. Only the ones the host sends or expects
//! back are listed.

/// Address pair carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Route {
    /// Sender of the frame. The host uses 0.
    pub src: u8,
    /// Receiver of the frame. A Ping1D answers to 0 unless reconfigured.
    pub dst: u8,
}

impl Route {
    #[inline]
    #[must_use]
    pub const fn new(src: u8, dst: u8) -> Self {
        Self { src, dst }
    }

    /// The route a device uses when answering a frame sent on `self`.
    #[inline]
    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

pub const ACK: u16 = 1;
pub const NACK: u16 = 2;
pub const DEVICE_INFORMATION: u16 = 4;
pub const PROTOCOL_VERSION: u16 = 5;
pub const GENERAL_REQUEST: u16 = 6;

pub const SET_RANGE: u16 = 1001;
pub const SET_SPEED_OF_SOUND: u16 = 1002;
pub const SET_MODE_AUTO: u16 = 1003;

pub const SPEED_OF_SOUND: u16 = 1203;
pub const RANGE: u16 = 1204;
pub const MODE_AUTO: u16 = 1205;
pub const DISTANCE_SIMPLE: u16 = 1211;
pub const DISTANCE: u16 = 1212;
pub const PROFILE: u16 = 1300;
