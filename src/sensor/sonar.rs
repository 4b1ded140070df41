#[cfg(feature = "defmt")]
use defmt::{info, warn};
use embassy_time::Ticker;

use super::{publish, Error, SampleSender, Stamped};
use crate::{
    bus::{BusHandle, Device, Transaction},
    config::{Config, TX_CAPACITY},
    frame::encode_message,
    well_known::{
        DeviceInformation, Distance, GeneralRequest, ModeAuto, SetModeAuto, SetRange,
        SetSpeedOfSound,
    },
    DecodeError, Message, Parser, Response,
};

/// Ping1D worker: one handshake, then a distance request every sample period.
pub struct SonarLoop<'a> {
    bus: BusHandle<'a>,
    parser: Parser,
    samples: SampleSender<'a, Distance>,
    config: Config,
}

impl<'a> SonarLoop<'a> {
    pub fn new(bus: BusHandle<'a>, samples: SampleSender<'a, Distance>, config: &Config) -> Self {
        Self {
            bus,
            parser: Parser::new(),
            samples,
            config: *config,
        }
    }

    /// Send `msg` and return the first frame in the reply with id `expect`.
    ///
    /// Other frames on the line are skipped. A NACK naming `msg` ends the
    /// exchange with [`Error::Rejected`].
    async fn exchange<T: Message>(&mut self, msg: &T, expect: u16) -> Result<Response, Error> {
        let mut tx = [0u8; TX_CAPACITY];
        let len = encode_message(msg, self.config.sonar_route, &mut tx)?;
        let transaction = Transaction::new(Device::Sonar, &tx[..len], self.config.sonar_timeout)?;

        let reply = self.bus.transact(transaction).await;

        self.parser.reset();
        let mut rest = reply.bytes();
        while !rest.is_empty() {
            let used = self.parser.feed(rest);
            rest = &rest[used..];

            let Some(packet) = self.parser.packet() else {
                continue;
            };
            match Response::decode(&packet) {
                Ok(Response::Nack(nack)) if nack.nacked_id == T::ID => {
                    #[cfg(feature = "defmt")]
                    warn!("sonar refused {}: {}", T::ID, nack.reason.as_str());
                    return Err(Error::Rejected(T::ID));
                }
                Ok(response) if response.message_id() == expect => return Ok(response),
                Err(e) if packet.message_id == expect => return Err(e.into()),
                _ => {}
            }
        }

        Err(Error::NoResponse)
    }

    /// Ask the sonar to send message `requested_id` back.
    async fn request(&mut self, requested_id: u16) -> Result<Response, Error> {
        self.exchange(&GeneralRequest { requested_id }, requested_id)
            .await
    }

    /// Send a setting and wait for its acknowledgement.
    pub async fn command<T: Message>(&mut self, command: &T) -> Result<(), Error> {
        match self.exchange(command, crate::id::ACK).await? {
            Response::Ack(ack) if ack.acked_id == T::ID => Ok(()),
            other => Err(Error::Decode(DecodeError::UnexpectedMessage(
                other.message_id(),
            ))),
        }
    }

    pub async fn device_information(&mut self) -> Result<DeviceInformation, Error> {
        match self.request(DeviceInformation::ID).await? {
            Response::DeviceInformation(info) => Ok(info),
            other => Err(Error::Decode(DecodeError::UnexpectedMessage(
                other.message_id(),
            ))),
        }
    }

    /// Identify the sonar and push the configured settings to it.
    ///
    /// Every step is attempted even if an earlier one gets no answer: a sonar
    /// that misses the handshake is still polled afterwards.
    pub async fn handshake(&mut self) -> Option<DeviceInformation> {
        let info = match self.device_information().await {
            Ok(info) => {
                #[cfg(feature = "defmt")]
                info!(
                    "sonar type {} rev {} firmware {}.{}.{}",
                    info.device_type,
                    info.device_revision,
                    info.firmware_version_major,
                    info.firmware_version_minor,
                    info.firmware_version_patch
                );
                Some(info)
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                warn!("sonar device information: {}", _e);
                None
            }
        };

        if let Some(range) = self.config.scan_range {
            let manual = SetModeAuto(ModeAuto { enabled: false });
            if let Err(_e) = self.command(&manual).await {
                #[cfg(feature = "defmt")]
                warn!("sonar set mode: {}", _e);
            }
            if let Err(_e) = self.command(&SetRange(range)).await {
                #[cfg(feature = "defmt")]
                warn!("sonar set range: {}", _e);
            }
        }

        let speed = SetSpeedOfSound {
            speed_of_sound_mm_s: self.config.speed_of_sound_mm_s,
        };
        if let Err(_e) = self.command(&speed).await {
            #[cfg(feature = "defmt")]
            warn!("sonar set speed of sound: {}", _e);
        }

        info
    }

    /// Request one distance and publish it.
    pub async fn poll(&mut self) -> Result<Stamped<Distance>, Error> {
        let distance = match self.request(Distance::ID).await? {
            Response::Distance(distance) => distance,
            other => {
                return Err(Error::Decode(DecodeError::UnexpectedMessage(
                    other.message_id(),
                )))
            }
        };

        let sample = Stamped::now(distance);
        publish(&self.samples, sample);
        Ok(sample)
    }

    pub async fn run(&mut self) -> ! {
        self.handshake().await;

        let mut ticker = Ticker::every(self.config.sample_interval);
        loop {
            if let Err(_e) = self.poll().await {
                #[cfg(feature = "defmt")]
                warn!("sonar poll: {}", _e);
            }
            ticker.next().await;
        }
    }
}
