//! Pairs every GNSS fix with a nearby sonar depth.
//!
//! Fixes pace the aggregator. After each fix it waits a short window for a
//! sonar sample; if none arrives the record carries the last depth seen. The
//! two sensors are not synchronised, so this is a best-effort pairing rather
//! than a barrier.

use core::fmt;

#[cfg(feature = "defmt")]
use defmt::warn;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Sender, TrySendError},
};
use embassy_time::{with_timeout, Duration};

use crate::{
    config::{Config, RECORD_QUEUE_DEPTH},
    sensor::{GnssFix, SampleReceiver, Stamped},
    well_known::Distance,
};

/// A positioned depth reading. `depth_m` is NaN until the first sonar sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MergedRecord {
    /// Observation time of the fix.
    pub timestamp_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_m: f32,
}

impl MergedRecord {
    /// Storage line: `<timestamp_ms>,<lat>,<lon>,<depth>\n`.
    pub fn write_line<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(
            out,
            "{},{:.6},{:.6},{:.2}",
            self.timestamp_ms, self.latitude, self.longitude, self.depth_m
        )
    }
}

pub type RecordQueue = Channel<CriticalSectionRawMutex, MergedRecord, RECORD_QUEUE_DEPTH>;
pub type RecordSender<'a> = Sender<'a, CriticalSectionRawMutex, MergedRecord, RECORD_QUEUE_DEPTH>;

pub struct Aggregator<'a> {
    fixes: SampleReceiver<'a, GnssFix>,
    depths: SampleReceiver<'a, Distance>,
    records: RecordSender<'a>,
    window: Duration,
    depth_offset_m: f32,
    last_depth_m: Option<f32>,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        fixes: SampleReceiver<'a, GnssFix>,
        depths: SampleReceiver<'a, Distance>,
        records: RecordSender<'a>,
        config: &Config,
    ) -> Self {
        Self {
            fixes,
            depths,
            records,
            window: config.correlation_window,
            depth_offset_m: config.depth_offset_m,
            last_depth_m: None,
        }
    }

    /// Most recent depth, in metres below the waterline.
    #[inline]
    #[must_use]
    pub fn last_depth_m(&self) -> Option<f32> {
        self.last_depth_m
    }

    /// Build the record for `fix`, taking the depth from `sonar` when present
    /// and from the last known depth otherwise.
    pub fn merge(
        &mut self,
        fix: &Stamped<GnssFix>,
        sonar: Option<&Stamped<Distance>>,
    ) -> MergedRecord {
        if let Some(sample) = sonar {
            self.last_depth_m =
                Some(sample.value.distance_mm as f32 / 1000.0 + self.depth_offset_m);
        }

        MergedRecord {
            timestamp_ms: fix.timestamp_ms,
            latitude: fix.value.latitude,
            longitude: fix.value.longitude,
            depth_m: self.last_depth_m.unwrap_or(f32::NAN),
        }
    }

    /// Wait for the next fix, correlate it and hand the record to the sink.
    ///
    /// Returns the record even if the sink queue was full and it was dropped.
    pub async fn poll(&mut self) -> MergedRecord {
        let fix = self.fixes.receive().await;
        let sonar = with_timeout(self.window, self.depths.receive()).await.ok();
        let record = self.merge(&fix, sonar.as_ref());

        if let Err(TrySendError::Full(_)) = self.records.try_send(record) {
            #[cfg(feature = "defmt")]
            warn!("record queue full, dropping record at {}", record.timestamp_ms);
        }

        record
    }

    pub async fn run(&mut self) -> ! {
        loop {
            self.poll().await;
        }
    }
}
