//! Buffered record logging.
//!
//! Records are formatted into text lines and collected in RAM, then written
//! out in one go once per log interval, or earlier when the next line would
//! not fit. The interval flush happens whether or not new records arrive.
//! Each line is also offered to the radio queue.
//!
//! Storage is any [`embedded_io_async::Write`], e.g. a file on an SD card.

#[cfg(feature = "defmt")]
use defmt::{debug, error, warn};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Receiver, Sender},
};
use embassy_time::{with_deadline, Duration, Instant};
use embedded_io_async::Write;

use crate::{
    aggregator::MergedRecord,
    config::{Config, RECORD_QUEUE_DEPTH, SINK_BUFFER_SIZE, TELEMETRY_QUEUE_DEPTH},
    sensor::TelemetryLine,
};

pub struct RecordLogger<'a, W> {
    records: Receiver<'a, CriticalSectionRawMutex, MergedRecord, RECORD_QUEUE_DEPTH>,
    telemetry: Option<Sender<'a, CriticalSectionRawMutex, TelemetryLine, TELEMETRY_QUEUE_DEPTH>>,
    storage: W,
    buffer: heapless::Vec<u8, SINK_BUFFER_SIZE>,
    interval: Duration,
    last_flush: Instant,
}

impl<'a, W: Write> RecordLogger<'a, W> {
    pub fn new(
        records: Receiver<'a, CriticalSectionRawMutex, MergedRecord, RECORD_QUEUE_DEPTH>,
        storage: W,
        config: &Config,
    ) -> Self {
        Self {
            records,
            telemetry: None,
            storage,
            buffer: heapless::Vec::new(),
            interval: config.log_interval,
            last_flush: Instant::now(),
        }
    }

    /// Also offer every line to the radio. Lines are dropped when the radio
    /// queue is full.
    pub fn with_telemetry(
        mut self,
        telemetry: Sender<'a, CriticalSectionRawMutex, TelemetryLine, TELEMETRY_QUEUE_DEPTH>,
    ) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Bytes waiting for the next flush.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn storage(&self) -> &W {
        &self.storage
    }

    /// Write out everything buffered. On failure the buffer is kept for the
    /// next attempt.
    pub async fn flush(&mut self) -> Result<(), W::Error> {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.storage.write_all(&self.buffer).await?;
        self.storage.flush().await?;
        self.buffer.clear();
        Ok(())
    }

    /// Log the next record, or flush if the interval runs out first.
    pub async fn poll(&mut self) -> Result<(), W::Error> {
        let due = self
            .last_flush
            .checked_add(self.interval)
            .unwrap_or(Instant::MAX);
        match with_deadline(due, self.records.receive()).await {
            Ok(record) => self.log(&record).await,
            Err(_timeout) => self.flush().await,
        }
    }

    pub async fn log(&mut self, record: &MergedRecord) -> Result<(), W::Error> {
        let mut line = TelemetryLine::new();
        if record.write_line(&mut line).is_err() {
            #[cfg(feature = "defmt")]
            warn!("record at {} does not fit a line", record.timestamp_ms);
            return Ok(());
        }

        let mut result = Ok(());
        if self.buffer.len() + line.len() > SINK_BUFFER_SIZE {
            result = self.flush().await;
        }

        if self.buffer.extend_from_slice(line.as_bytes()).is_err() {
            #[cfg(feature = "defmt")]
            warn!("log buffer full, dropping record at {}", record.timestamp_ms);
        }

        if let Some(telemetry) = &self.telemetry {
            if telemetry.try_send(line).is_err() {
                #[cfg(feature = "defmt")]
                debug!("telemetry queue full");
            }
        }

        if result.is_ok() && self.last_flush.elapsed() >= self.interval {
            result = self.flush().await;
        }

        result
    }

    pub async fn run(&mut self) -> ! {
        loop {
            if let Err(_e) = self.poll().await {
                #[cfg(feature = "defmt")]
                error!("log flush failed");
            }
        }
    }
}
