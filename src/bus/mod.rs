//! Shared-bus arbiter.
//!
//! Every device on the vessel shares one UART behind a multiplexer. The
//! [`Arbiter`] is the only code that touches the line or the mux: it takes
//! transactions from a single FIFO and runs them one at a time, so switching
//! the mux can never happen in the middle of another device's exchange.
//!
//! Workers talk to it through a [`BusHandle`], each with its own one-shot
//! [`ReplySlot`]. A transaction is moved into the queue and the finished
//! [`Reply`] is moved back through the slot, so requester and arbiter never
//! share a buffer.
//!
//! ```ignore
//! static REQUESTS: RequestQueue<'static> = RequestQueue::new();
//! static SONAR_SLOT: ReplySlot = ReplySlot::new();
//!
//! let mut arbiter = Arbiter::new(uart, mux, REQUESTS.receiver(), &config);
//! let mut sonar = BusHandle::new(REQUESTS.sender(), &SONAR_SLOT, &config);
//! ```

#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver, Sender},
    signal::Signal,
};
use embassy_time::{with_deadline, Duration, Instant, Timer};
use embedded_io_async::{Read, ReadReady, Write};

use crate::config::{Config, REQUEST_QUEUE_DEPTH, RX_CAPACITY, TX_CAPACITY};

mod mux;

pub use mux::{DeviceSelect, Mux};

/// Everything reachable through the mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Device {
    Gnss,
    Sonar,
    FlightController,
    Radio,
}

impl Device {
    /// Mux input the device is wired to.
    #[inline]
    #[must_use]
    pub const fn mux_channel(self) -> u8 {
        match self {
            Self::Gnss => 0,
            Self::Sonar => 1,
            Self::FlightController => 2,
            Self::Radio => 3,
        }
    }
}

/// The transaction payload does not fit [`TX_CAPACITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacityError;

/// One request for the bus: what to send, to whom, and how long to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub device: Device,
    pub tx: heapless::Vec<u8, TX_CAPACITY>,
    pub timeout: Duration,
}

impl Transaction {
    pub fn new(device: Device, tx: &[u8], timeout: Duration) -> Result<Self, CapacityError> {
        Ok(Self {
            device,
            tx: heapless::Vec::from_slice(tx).map_err(|_| CapacityError)?,
            timeout,
        })
    }
}

/// Whatever the device sent back within the transaction timeout. An empty
/// reply means the device stayed silent; it is not an error.
#[derive(Debug, Clone)]
pub struct Reply {
    seq: u32,
    len: usize,
    data: [u8; RX_CAPACITY],
}

impl Reply {
    const fn empty(seq: u32) -> Self {
        Self {
            seq,
            len: 0,
            data: [0; RX_CAPACITY],
        }
    }

    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One-shot wake-up for a single requester. The arbiter stores the reply and
/// wakes the waiter in one step, so a woken requester always sees the full
/// reply.
pub type ReplySlot = Signal<CriticalSectionRawMutex, Reply>;

/// A queued transaction and where to deliver its reply.
pub struct Envelope<'a> {
    seq: u32,
    transaction: Transaction,
    slot: &'a ReplySlot,
}

pub type RequestQueue<'a> = Channel<CriticalSectionRawMutex, Envelope<'a>, REQUEST_QUEUE_DEPTH>;

#[derive(Debug, PartialEq, Eq)]
pub enum Error<S, D> {
    Serial(S),
    Select(D),
}

/// Sole owner of the serial line and the mux.
///
/// The line is any async UART. `read` may wait indefinitely on a silent
/// device; the arbiter bounds every wait with the transaction timeout.
/// `read_ready` is used to empty the receive buffer before each write.
pub struct Arbiter<'a, S, D> {
    serial: S,
    mux: D,
    requests: Receiver<'a, CriticalSectionRawMutex, Envelope<'a>, REQUEST_QUEUE_DEPTH>,
    settle: Duration,
}

impl<'a, S, D> Arbiter<'a, S, D>
where
    S: Read + Write + ReadReady,
    D: DeviceSelect,
{
    pub fn new(
        serial: S,
        mux: D,
        requests: Receiver<'a, CriticalSectionRawMutex, Envelope<'a>, REQUEST_QUEUE_DEPTH>,
        config: &Config,
    ) -> Self {
        Self {
            serial,
            mux,
            requests,
            settle: config.mux_settle,
        }
    }

    /// Run the next queued transaction to completion.
    ///
    /// The requester is woken exactly once whatever happens. A serial or mux
    /// failure still delivers whatever was read before it and is then
    /// returned here for logging.
    pub async fn poll(&mut self) -> Result<(), Error<S::Error, D::Error>> {
        let Envelope {
            seq,
            transaction,
            slot,
        } = self.requests.receive().await;

        let mut reply = Reply::empty(seq);
        let result = self.exchange(&transaction, &mut reply).await;

        #[cfg(feature = "defmt")]
        debug!(
            "{} tx={} rx={}",
            transaction.device,
            transaction.tx.len(),
            reply.len
        );

        slot.signal(reply);
        result
    }

    pub async fn run(&mut self) -> ! {
        loop {
            if let Err(_e) = self.poll().await {
                #[cfg(feature = "defmt")]
                warn!("bus transaction failed");
            }
        }
    }

    async fn exchange(
        &mut self,
        transaction: &Transaction,
        reply: &mut Reply,
    ) -> Result<(), Error<S::Error, D::Error>> {
        self.mux
            .select(transaction.device)
            .map_err(Error::Select)?;
        Timer::after(self.settle).await;

        self.discard_input(&mut reply.data)
            .await
            .map_err(Error::Serial)?;
        self.serial
            .write_all(&transaction.tx)
            .await
            .map_err(Error::Serial)?;
        self.serial.flush().await.map_err(Error::Serial)?;

        let deadline = Instant::now() + transaction.timeout;
        while reply.len < RX_CAPACITY {
            match with_deadline(deadline, self.serial.read(&mut reply.data[reply.len..])).await {
                Ok(Ok(n)) => reply.len += n,
                Ok(Err(e)) => return Err(Error::Serial(e)),
                Err(_timeout) => break,
            }
        }

        Ok(())
    }

    /// Throw away anything already received, using `scratch` as the sink.
    async fn discard_input(&mut self, scratch: &mut [u8]) -> Result<(), S::Error> {
        while self.serial.read_ready()? {
            if self.serial.read(scratch).await? == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// A worker's access to the bus. Holding it by `&mut` is what keeps a worker
/// from having two transactions in flight.
pub struct BusHandle<'a> {
    requests: Sender<'a, CriticalSectionRawMutex, Envelope<'a>, REQUEST_QUEUE_DEPTH>,
    slot: &'a ReplySlot,
    seq: u32,
    grace: Duration,
}

impl<'a> BusHandle<'a> {
    /// `slot` must not be shared with any other handle.
    pub fn new(
        requests: Sender<'a, CriticalSectionRawMutex, Envelope<'a>, REQUEST_QUEUE_DEPTH>,
        slot: &'a ReplySlot,
        config: &Config,
    ) -> Self {
        slot.reset();
        Self {
            requests,
            slot,
            seq: 0,
            grace: config.reply_grace,
        }
    }

    /// Queue a transaction and wait for its reply.
    ///
    /// Waits for queue space rather than dropping the request. Once queued,
    /// waits at most the transaction timeout plus the configured grace and
    /// returns an empty reply if the arbiter has not answered by then. A late
    /// reply to an abandoned transaction is recognised and skipped by the next
    /// call.
    pub async fn transact(&mut self, transaction: Transaction) -> Reply {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let wait = transaction.timeout + self.grace;

        self.requests
            .send(Envelope {
                seq,
                transaction,
                slot: self.slot,
            })
            .await;

        let deadline = Instant::now() + wait;
        loop {
            match with_deadline(deadline, self.slot.wait()).await {
                Ok(reply) if reply.seq == seq => return reply,
                Ok(_stale) => continue,
                Err(_timeout) => {
                    #[cfg(feature = "defmt")]
                    warn!("bus reply #{} not delivered in time", seq);
                    return Reply::empty(seq);
                }
            }
        }
    }
}
