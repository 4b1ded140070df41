use generic_array::typenum;

use crate::{frame::Packet, id, parser::MAX_PAYLOAD_LEN, Buf, BufMut, DecodeError, Message};

/// Longest NACK reason kept; the rest of the text is dropped.
pub const MAX_NACK_TEXT: usize = 64;
/// Profile samples that fit a full receive buffer next to the profile header.
pub const MAX_PROFILE_DATA: usize = MAX_PAYLOAD_LEN - Profile::HEADER_LEN;

/// Ask the device to send back the message with `requested_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GeneralRequest {
    pub requested_id: u16,
}

impl Message for GeneralRequest {
    const ID: u16 = id::GENERAL_REQUEST;

    type EncodedLen = typenum::U2;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u16(self.requested_id);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            requested_id: data.get_u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetSpeedOfSound {
    pub speed_of_sound_mm_s: u32,
}

impl Message for SetSpeedOfSound {
    const ID: u16 = id::SET_SPEED_OF_SOUND;

    type EncodedLen = typenum::U4;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.speed_of_sound_mm_s);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            speed_of_sound_mm_s: data.get_u32()?,
        })
    }
}

/// Scan window, both as a command (set range) and as the device's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Range {
    pub scan_start_mm: u32,
    pub scan_length_mm: u32,
}

impl Message for Range {
    const ID: u16 = id::RANGE;

    type EncodedLen = typenum::U8;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.scan_start_mm);
        buf.put_u32(self.scan_length_mm);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            scan_start_mm: data.get_u32()?,
            scan_length_mm: data.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetRange(pub Range);

impl Message for SetRange {
    const ID: u16 = id::SET_RANGE;

    type EncodedLen = typenum::U8;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf);
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Range::decode(data).map(Self)
    }
}

/// Automatic gain and range selection. Both the command and the answer carry
/// the same single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeAuto {
    pub enabled: bool,
}

impl Message for ModeAuto {
    const ID: u16 = id::MODE_AUTO;

    type EncodedLen = typenum::U1;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u8(u8::from(self.enabled));
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            enabled: data.get_u8()? != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetModeAuto(pub ModeAuto);

impl Message for SetModeAuto {
    const ID: u16 = id::SET_MODE_AUTO;

    type EncodedLen = typenum::U1;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf);
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        ModeAuto::decode(data).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ack {
    pub acked_id: u16,
}

impl Message for Ack {
    const ID: u16 = id::ACK;

    type EncodedLen = typenum::U2;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u16(self.acked_id);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            acked_id: data.get_u16()?,
        })
    }
}

/// Refusal of a command. The reason text is variable length, so this is not a
/// [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Nack {
    pub nacked_id: u16,
    pub reason: heapless::String<MAX_NACK_TEXT>,
}

impl Nack {
    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let nacked_id = data.get_u16()?;

        // the device null-terminates the text
        let text = data.split(|&b| b == 0).next().unwrap_or_default();
        let text = &text[..text.len().min(MAX_NACK_TEXT)];
        let mut reason = heapless::String::new();
        for c in text.utf8_chunks().flat_map(|chunk| chunk.valid().chars()) {
            if reason.push(c).is_err() {
                break;
            }
        }

        Ok(Self { nacked_id, reason })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInformation {
    pub device_type: u8,
    pub device_revision: u8,
    pub firmware_version_major: u8,
    pub firmware_version_minor: u8,
    pub firmware_version_patch: u8,
}

impl Message for DeviceInformation {
    const ID: u16 = id::DEVICE_INFORMATION;

    type EncodedLen = typenum::U6;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u8(self.device_type);
        buf.put_u8(self.device_revision);
        buf.put_u8(self.firmware_version_major);
        buf.put_u8(self.firmware_version_minor);
        buf.put_u8(self.firmware_version_patch);
        buf.put_u8(0); // reserved
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            device_type: data.get_u8()?,
            device_revision: data.get_u8()?,
            firmware_version_major: data.get_u8()?,
            firmware_version_minor: data.get_u8()?,
            firmware_version_patch: data.get_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Message for ProtocolVersion {
    const ID: u16 = id::PROTOCOL_VERSION;

    type EncodedLen = typenum::U4;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u8(self.patch);
        buf.put_u8(0); // reserved
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            major: data.get_u8()?,
            minor: data.get_u8()?,
            patch: data.get_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedOfSound {
    pub speed_of_sound_mm_s: u32,
}

impl Message for SpeedOfSound {
    const ID: u16 = id::SPEED_OF_SOUND;

    type EncodedLen = typenum::U4;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.speed_of_sound_mm_s);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            speed_of_sound_mm_s: data.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DistanceSimple {
    pub distance_mm: u32,
    pub confidence: u8,
}

impl Message for DistanceSimple {
    const ID: u16 = id::DISTANCE_SIMPLE;

    type EncodedLen = typenum::U5;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.distance_mm);
        buf.put_u8(self.confidence);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            distance_mm: data.get_u32()?,
            confidence: data.get_u8()?,
        })
    }
}

/// One sonar measurement: the most recent distance along with the settings it
/// was taken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Distance {
    pub distance_mm: u32,
    /// Confidence in `distance_mm`, in percent.
    pub confidence: u16,
    pub transmit_duration_us: u16,
    pub ping_number: u32,
    pub scan_start_mm: u32,
    pub scan_length_mm: u32,
    /// Receiver gain index, 0..=6.
    pub gain_setting: u32,
}

impl Message for Distance {
    const ID: u16 = id::DISTANCE;

    type EncodedLen = typenum::U24;

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.distance_mm);
        buf.put_u16(self.confidence);
        buf.put_u16(self.transmit_duration_us);
        buf.put_u32(self.ping_number);
        buf.put_u32(self.scan_start_mm);
        buf.put_u32(self.scan_length_mm);
        buf.put_u32(self.gain_setting);
    }

    fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            distance_mm: data.get_u32()?,
            confidence: data.get_u16()?,
            transmit_duration_us: data.get_u16()?,
            ping_number: data.get_u32()?,
            scan_start_mm: data.get_u32()?,
            scan_length_mm: data.get_u32()?,
            gain_setting: data.get_u32()?,
        })
    }
}

/// A distance measurement followed by the raw echo strength samples across the
/// scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Profile {
    pub distance: Distance,
    pub data: heapless::Vec<u8, MAX_PROFILE_DATA>,
}

impl Profile {
    /// Distance fields plus the 16-bit data length.
    pub const HEADER_LEN: usize = 26;

    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let distance = Distance::decode(data.get_bytes(24)?)?;
        let len = data.get_u16()?;
        let samples = data.get_bytes(usize::from(len))?;

        Ok(Self {
            distance,
            data: heapless::Vec::from_slice(samples)
                .map_err(|_| DecodeError::ProfileTooLong(len))?,
        })
    }
}

/// Every message the host knows how to receive, keyed by message id.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    Ack(Ack),
    Nack(Nack),
    DeviceInformation(DeviceInformation),
    ProtocolVersion(ProtocolVersion),
    SpeedOfSound(SpeedOfSound),
    Range(Range),
    ModeAuto(ModeAuto),
    DistanceSimple(DistanceSimple),
    Distance(Distance),
    Profile(Profile),
}

impl Response {
    pub fn decode(packet: &Packet<'_>) -> Result<Self, DecodeError> {
        let data = packet.payload;
        match packet.message_id {
            Ack::ID => Ack::decode(data).map(Self::Ack),
            id::NACK => Nack::decode(data).map(Self::Nack),
            DeviceInformation::ID => DeviceInformation::decode(data).map(Self::DeviceInformation),
            ProtocolVersion::ID => ProtocolVersion::decode(data).map(Self::ProtocolVersion),
            SpeedOfSound::ID => SpeedOfSound::decode(data).map(Self::SpeedOfSound),
            Range::ID => Range::decode(data).map(Self::Range),
            ModeAuto::ID => ModeAuto::decode(data).map(Self::ModeAuto),
            DistanceSimple::ID => DistanceSimple::decode(data).map(Self::DistanceSimple),
            Distance::ID => Distance::decode(data).map(Self::Distance),
            id::PROFILE => Profile::decode(data).map(Self::Profile),
            other => Err(DecodeError::UnexpectedMessage(other)),
        }
    }

    #[must_use]
    pub fn message_id(&self) -> u16 {
        match self {
            Self::Ack(_) => Ack::ID,
            Self::Nack(_) => id::NACK,
            Self::DeviceInformation(_) => DeviceInformation::ID,
            Self::ProtocolVersion(_) => ProtocolVersion::ID,
            Self::SpeedOfSound(_) => SpeedOfSound::ID,
            Self::Range(_) => Range::ID,
            Self::ModeAuto(_) => ModeAuto::ID,
            Self::DistanceSimple(_) => DistanceSimple::ID,
            Self::Distance(_) => Distance::ID,
            Self::Profile(_) => id::PROFILE,
        }
    }
}
