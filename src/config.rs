//! Worker configuration and fixed capacities.
//!
//! Each worker receives its own copy of [`Config`] at construction, so tests
//! can shorten periods and timeouts without touching shared state.

use embassy_time::Duration;

use crate::id::Route;
use crate::well_known::Range;

/// Bytes a single transaction may write.
pub const TX_CAPACITY: usize = 128;
/// Bytes a single transaction may read back.
pub const RX_CAPACITY: usize = 512;

/// Transactions waiting for the bus. Submitting to a full queue waits.
pub const REQUEST_QUEUE_DEPTH: usize = 10;
/// Published samples per sensor. Publishing to a full queue drops the sample.
pub const SAMPLE_QUEUE_DEPTH: usize = 5;
/// Merged records waiting for the sink. A full queue drops the record.
pub const RECORD_QUEUE_DEPTH: usize = 10;
/// Lines waiting for the radio.
pub const TELEMETRY_QUEUE_DEPTH: usize = 10;

/// Formatted records held in RAM between flushes.
pub const SINK_BUFFER_SIZE: usize = 4096;
/// Longest line the radio will send in one transaction.
pub const TELEMETRY_LINE_LEN: usize = TX_CAPACITY;

/// Speed of sound in sea water, mm/s.
pub const SEAWATER_SPEED_OF_SOUND: u32 = 1_500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Cadence of the GNSS and sonar loops.
    pub sample_interval: Duration,
    /// Cadence of the radio loop and of sink flushes.
    pub log_interval: Duration,
    /// How long the aggregator waits for a sonar sample after each fix.
    pub correlation_window: Duration,
    pub gnss_timeout: Duration,
    pub sonar_timeout: Duration,
    pub radio_timeout: Duration,
    /// Delay between switching the mux and touching the line.
    pub mux_settle: Duration,
    /// How long past its own timeout a requester waits for the arbiter before
    /// giving up on a reply.
    pub reply_grace: Duration,
    /// Bytes written to the GNSS receiver each cycle. Empty for receivers that
    /// stream NMEA on their own.
    pub gnss_poll: &'static [u8],
    /// Frame addressing for the Ping1D.
    pub sonar_route: Route,
    pub speed_of_sound_mm_s: u32,
    /// Manual scan window. `None` leaves the sonar in auto mode.
    pub scan_range: Option<Range>,
    /// Transducer depth below the waterline, added to every sonar distance.
    pub depth_offset_m: f32,
}

impl Config {
    pub const DEFAULT: Self = Self {
        sample_interval: Duration::from_millis(500),
        log_interval: Duration::from_millis(2000),
        correlation_window: Duration::from_millis(200),
        gnss_timeout: Duration::from_millis(100),
        sonar_timeout: Duration::from_millis(200),
        radio_timeout: Duration::from_millis(500),
        mux_settle: Duration::from_millis(2),
        reply_grace: Duration::from_millis(1000),
        gnss_poll: &[],
        sonar_route: Route::new(0, 0),
        speed_of_sound_mm_s: SEAWATER_SPEED_OF_SOUND,
        scan_range: None,
        depth_offset_m: 0.0,
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
