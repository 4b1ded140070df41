#[cfg(feature = "defmt")]
use defmt::warn;
use embassy_time::Ticker;

use super::{publish, Error, SampleSender, Stamped};
use crate::{
    bus::{BusHandle, Device, Transaction},
    config::Config,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixQuality {
    /// The receiver has no usable position. Such fixes are never published.
    NoFix,
    Fix2D,
    Fix3D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GnssFix {
    /// Decimal degrees, north positive.
    pub latitude: f64,
    /// Decimal degrees, east positive.
    pub longitude: f64,
    /// Metres above mean sea level.
    pub altitude_m: f32,
    pub quality: FixQuality,
    pub satellites: u8,
}

/// Turns the bytes read from the receiver into a position.
pub trait GnssCodec {
    /// Forget any partial input. Called before each bus read so a sentence
    /// cut off by one read is never completed by the next.
    fn reset(&mut self);

    /// Consume one bus read and return the newest fix it completed, if any.
    fn decode(&mut self, bytes: &[u8]) -> Option<GnssFix>;
}

/// NMEA 0183 decoding.
///
/// Position comes from GGA. GGA cannot tell a 2D solution from a 3D one, so
/// a GSA in the same read refines the quality; without one a valid GGA
/// counts as 3D.
#[cfg(feature = "nmea")]
pub struct NmeaCodec {
    parser: nmea0183::Parser,
}

#[cfg(feature = "nmea")]
impl NmeaCodec {
    pub fn new() -> Self {
        Self {
            parser: nmea0183::Parser::new(),
        }
    }
}

#[cfg(feature = "nmea")]
impl Default for NmeaCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "nmea")]
impl From<&nmea0183::GPSQuality> for FixQuality {
    fn from(quality: &nmea0183::GPSQuality) -> Self {
        use nmea0183::GPSQuality;

        match quality {
            GPSQuality::NoFix
            | GPSQuality::Estimated
            | GPSQuality::Manual
            | GPSQuality::Simulated => Self::NoFix,
            GPSQuality::GPS
            | GPSQuality::DGPS
            | GPSQuality::PPS
            | GPSQuality::RTK
            | GPSQuality::FRTK => Self::Fix3D,
        }
    }
}

#[cfg(feature = "nmea")]
impl From<&nmea0183::FixType> for FixQuality {
    fn from(fix_type: &nmea0183::FixType) -> Self {
        match fix_type {
            nmea0183::FixType::NoFix => Self::NoFix,
            nmea0183::FixType::Fix2D => Self::Fix2D,
            nmea0183::FixType::Fix3D => Self::Fix3D,
        }
    }
}

#[cfg(feature = "nmea")]
impl GnssCodec for NmeaCodec {
    fn reset(&mut self) {
        self.parser = nmea0183::Parser::new();
    }

    fn decode(&mut self, bytes: &[u8]) -> Option<GnssFix> {
        use nmea0183::ParseResult;

        let mut fix: Option<GnssFix> = None;
        let mut dimension = None;

        for &byte in bytes {
            // sentences with empty fields parse to `None` and are skipped
            match self.parser.parse_from_byte(byte) {
                Some(Ok(ParseResult::GGA(Some(gga)))) => {
                    fix = Some(GnssFix {
                        latitude: gga.latitude.as_f64(),
                        longitude: gga.longitude.as_f64(),
                        altitude_m: gga.altitude.meters,
                        quality: FixQuality::from(&gga.gps_quality),
                        satellites: gga.sat_in_use,
                    });
                }
                Some(Ok(ParseResult::GSA(Some(gsa)))) => {
                    dimension = Some(FixQuality::from(&gsa.fix_type));
                }
                _ => {}
            }
        }

        let mut fix = fix?;
        if let (FixQuality::Fix3D, Some(dimension)) = (fix.quality, dimension) {
            fix.quality = dimension;
        }
        Some(fix)
    }
}

/// GNSS worker: reads the receiver every sample period.
pub struct GnssLoop<'a, C> {
    bus: BusHandle<'a>,
    codec: C,
    samples: SampleSender<'a, GnssFix>,
    config: Config,
}

impl<'a, C: GnssCodec> GnssLoop<'a, C> {
    pub fn new(
        bus: BusHandle<'a>,
        codec: C,
        samples: SampleSender<'a, GnssFix>,
        config: &Config,
    ) -> Self {
        Self {
            bus,
            codec,
            samples,
            config: *config,
        }
    }

    /// Read the receiver once and publish the fix it produced.
    pub async fn poll(&mut self) -> Result<Stamped<GnssFix>, Error> {
        let transaction =
            Transaction::new(Device::Gnss, self.config.gnss_poll, self.config.gnss_timeout)?;
        let reply = self.bus.transact(transaction).await;

        self.codec.reset();
        let fix = self.codec.decode(reply.bytes()).ok_or(Error::NoResponse)?;
        if fix.quality == FixQuality::NoFix {
            return Err(Error::NoFix);
        }

        let sample = Stamped::now(fix);
        publish(&self.samples, sample);
        Ok(sample)
    }

    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(self.config.sample_interval);
        loop {
            if let Err(_e) = self.poll().await {
                #[cfg(feature = "defmt")]
                warn!("gnss poll: {}", _e);
            }
            ticker.next().await;
        }
    }
}
