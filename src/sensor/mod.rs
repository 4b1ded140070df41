//! Periodic sensor workers.
//!
//! Each loop builds a request, runs it through its [`BusHandle`], decodes the
//! reply and publishes a [`Stamped`] sample to its own bounded queue. A sample
//! that fails to decode is dropped; the next tick is the retry.
//!
//! [`BusHandle`]: crate::bus::BusHandle

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver, Sender, TrySendError},
};
use embassy_time::Instant;

use crate::bus::CapacityError;
use crate::config::SAMPLE_QUEUE_DEPTH;
use crate::{DecodeError, EncodeError};

pub mod gnss;
pub mod radio;
pub mod sonar;

pub use gnss::{FixQuality, GnssCodec, GnssFix, GnssLoop};
pub use radio::{RadioLoop, TelemetryLine, TelemetryQueue};
pub use sonar::SonarLoop;

/// Monotonic milliseconds since boot.
#[inline]
#[must_use]
pub fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// A decoded reading and the moment it was decoded. The timestamp is taken
/// when the reply parses, never when the request goes out.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stamped<T> {
    pub value: T,
    pub timestamp_ms: u64,
}

impl<T> Stamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            timestamp_ms: now_ms(),
        }
    }
}

/// Single-producer queue of samples from one sensor. Consumers must not assume
/// they are the only reader.
pub type SampleQueue<T> = Channel<CriticalSectionRawMutex, Stamped<T>, SAMPLE_QUEUE_DEPTH>;
pub type SampleSender<'a, T> = Sender<'a, CriticalSectionRawMutex, Stamped<T>, SAMPLE_QUEUE_DEPTH>;
pub type SampleReceiver<'a, T> =
    Receiver<'a, CriticalSectionRawMutex, Stamped<T>, SAMPLE_QUEUE_DEPTH>;

/// Why a poll produced no sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The device stayed silent, or nothing in its reply parsed.
    NoResponse,
    /// The GNSS receiver answered but reported no usable position.
    NoFix,
    /// A frame arrived but its payload was not what was asked for.
    Decode(DecodeError),
    /// The device refused the command with this id.
    Rejected(u16),
    Encode(EncodeError),
    Capacity,
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<CapacityError> for Error {
    fn from(_: CapacityError) -> Self {
        Self::Capacity
    }
}

/// Publish without waiting. Returns `false` when the queue was full and the
/// sample was dropped.
fn publish<T>(queue: &SampleSender<'_, T>, sample: Stamped<T>) -> bool {
    match queue.try_send(sample) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            #[cfg(feature = "defmt")]
            defmt::warn!("sample queue full, dropping sample");
            false
        }
    }
}
