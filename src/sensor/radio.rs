#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver},
};
use embassy_time::Timer;

use super::Error;
use crate::{
    bus::{BusHandle, Device, Transaction},
    config::{Config, TELEMETRY_LINE_LEN, TELEMETRY_QUEUE_DEPTH},
};

pub type TelemetryLine = heapless::String<TELEMETRY_LINE_LEN>;
pub type TelemetryQueue = Channel<CriticalSectionRawMutex, TelemetryLine, TELEMETRY_QUEUE_DEPTH>;

/// Telemetry worker: forwards queued text lines to the radio, one per log
/// period. The radio is write-only, so replies are ignored.
pub struct RadioLoop<'a> {
    bus: BusHandle<'a>,
    lines: Receiver<'a, CriticalSectionRawMutex, TelemetryLine, TELEMETRY_QUEUE_DEPTH>,
    config: Config,
}

impl<'a> RadioLoop<'a> {
    pub fn new(
        bus: BusHandle<'a>,
        lines: Receiver<'a, CriticalSectionRawMutex, TelemetryLine, TELEMETRY_QUEUE_DEPTH>,
        config: &Config,
    ) -> Self {
        Self {
            bus,
            lines,
            config: *config,
        }
    }

    pub async fn send(&mut self, line: &str) -> Result<(), Error> {
        let transaction =
            Transaction::new(Device::Radio, line.as_bytes(), self.config.radio_timeout)?;
        self.bus.transact(transaction).await;

        #[cfg(feature = "defmt")]
        debug!("radio sent {=str}", line);
        Ok(())
    }

    /// Wait for the next queued line and transmit it.
    pub async fn poll(&mut self) -> Result<(), Error> {
        let line = self.lines.receive().await;
        self.send(&line).await
    }

    pub async fn run(&mut self) -> ! {
        loop {
            if let Err(_e) = self.poll().await {
                #[cfg(feature = "defmt")]
                warn!("radio: {}", _e);
            }
            Timer::after(self.config.log_interval).await;
        }
    }
}
