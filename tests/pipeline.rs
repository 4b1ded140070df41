use std::sync::{Arc, Mutex};

use embassy_executor::Executor;
use embassy_futures::{
    block_on,
    join::join,
    select::{select, Either},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{ErrorKind, ErrorType, Write};
use static_cell::StaticCell;
use usv_logger::{
    aggregator::{Aggregator, MergedRecord, RecordQueue},
    bus::{Arbiter, BusHandle, Device, ReplySlot, RequestQueue},
    config::{Config, RECORD_QUEUE_DEPTH, SINK_BUFFER_SIZE, TELEMETRY_QUEUE_DEPTH},
    frame::encode_message,
    id,
    sensor::{
        gnss::NmeaCodec, Error, FixQuality, GnssFix, GnssLoop, RadioLoop, SampleQueue, SonarLoop,
        Stamped, TelemetryLine, TelemetryQueue,
    },
    sink::RecordLogger,
    well_known::{Ack, Distance},
    Message, Parser, Route,
};


use bus::FakeLine;

const GGA: &[u8] = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

fn fix() -> GnssFix {
    GnssFix {
        latitude: 59.329_323,
        longitude: 18.068_581,
        altitude_m: 1.5,
        quality: FixQuality::Fix3D,
        satellites: 11,
    }
}

fn ping(distance_mm: u32) -> Distance {
    Distance {
        distance_mm,
        confidence: 100,
        transmit_duration_us: 80,
        ping_number: 1,
        scan_start_mm: 0,
        scan_length_mm: 10_000,
        gain_setting: 1,
    }
}

fn record(timestamp_ms: u64) -> MergedRecord {
    MergedRecord {
        timestamp_ms,
        latitude: 59.329_323,
        longitude: 18.068_581,
        depth_m: 4.2,
    }
}

fn line_of(timestamp_ms: u64) -> String {
    format!("{timestamp_ms},59.329323,18.068581,4.20\n")
}

fn message<T: Message>(msg: &T, route: Route) -> Vec<u8> {
    let mut out = [0u8; 128];
    let len = encode_message(msg, route, &mut out).unwrap();
    out[..len].to_vec()
}

/// Depth reported by the sample arriving `delay` after a fix, with a 3 m
/// reading already on record.
fn depth_with_sonar_after(delay: Duration) -> f32 {
    let fixes = SampleQueue::<GnssFix>::new();
    let depths = SampleQueue::<Distance>::new();
    let records = RecordQueue::new();
    let config = Config::DEFAULT;
    let mut aggregator = Aggregator::new(
        fixes.receiver(),
        depths.receiver(),
        records.sender(),
        &config,
    );
    aggregator.merge(&Stamped::now(fix()), Some(&Stamped::now(ping(3_000))));

    let (record, ()) = block_on(join(aggregator.poll(), async {
        fixes.try_send(Stamped::now(fix())).unwrap();
        Timer::after(delay).await;
        depths.try_send(Stamped::now(ping(4_200))).unwrap();
    }));

    assert_eq!(records.try_receive().ok(), Some(record));
    record.depth_m
}

#[test]
fn sonar_sample_inside_window_is_paired() {
    assert_eq!(depth_with_sonar_after(Duration::from_millis(150)), 4.2);
}

#[test]
fn late_sonar_sample_falls_back_to_last_depth() {
    assert_eq!(depth_with_sonar_after(Duration::from_millis(250)), 3.0);
}

#[test]
fn record_for_fix_before_any_sonar_has_no_depth() {
    let fixes = SampleQueue::<GnssFix>::new();
    let depths = SampleQueue::<Distance>::new();
    let records = RecordQueue::new();
    let config = Config {
        correlation_window: Duration::from_millis(10),
        ..Config::DEFAULT
    };
    let mut aggregator = Aggregator::new(
        fixes.receiver(),
        depths.receiver(),
        records.sender(),
        &config,
    );

    fixes.try_send(Stamped::now(fix())).unwrap();
    let record = block_on(aggregator.poll());

    assert!(record.depth_m.is_nan());
    let mut line = String::new();
    record.write_line(&mut line).unwrap();
    assert!(line.ends_with(",NaN\n"), "{line}");
}

#[test]
fn full_record_queue_drops_new_records() {
    let fixes = SampleQueue::<GnssFix>::new();
    let depths = SampleQueue::<Distance>::new();
    let records = RecordQueue::new();
    let config = Config {
        correlation_window: Duration::from_millis(1),
        ..Config::DEFAULT
    };
    let mut aggregator = Aggregator::new(
        fixes.receiver(),
        depths.receiver(),
        records.sender(),
        &config,
    );

    let backlog = 1_000_000_000..1_000_000_000 + RECORD_QUEUE_DEPTH as u64;
    for i in backlog.clone() {
        records.try_send(record(i)).unwrap();
    }

    fixes.try_send(Stamped::now(fix())).unwrap();
    let dropped = block_on(aggregator.poll());

    let mut queued = Vec::new();
    while let Ok(record) = records.try_receive() {
        queued.push(record.timestamp_ms);
    }
    assert_eq!(queued, backlog.collect::<Vec<_>>());
    assert!(!queued.contains(&dropped.timestamp_ms));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CardRemoved;

#[derive(Default)]
struct Card {
    data: Vec<u8>,
    writes: usize,
    removed: bool,
}

/// An SD card that keeps everything written to it.
#[derive(Clone, Default)]
struct FakeCard(Arc<Mutex<Card>>);

impl FakeCard {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().data.clone()).unwrap()
    }

    fn writes(&self) -> usize {
        self.0.lock().unwrap().writes
    }

    fn set_removed(&self, removed: bool) {
        self.0.lock().unwrap().removed = removed;
    }
}

impl embedded_io_async::Error for CardRemoved {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NotConnected
    }
}

impl ErrorType for FakeCard {
    type Error = CardRemoved;
}

impl Write for FakeCard {
    async fn write(&mut self, data: &[u8]) -> Result<usize, CardRemoved> {
        let mut card = self.0.lock().unwrap();
        if card.removed {
            return Err(CardRemoved);
        }
        card.data.extend_from_slice(data);
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<(), CardRemoved> {
        let mut card = self.0.lock().unwrap();
        if card.removed {
            return Err(CardRemoved);
        }
        card.writes += 1;
        Ok(())
    }
}

fn hourly() -> Config {
    Config {
        log_interval: Duration::from_secs(3600),
        ..Config::DEFAULT
    }
}

#[test]
fn lines_are_buffered_until_flushed() {
    let records = RecordQueue::new();
    let card = FakeCard::default();
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &hourly());

    block_on(async {
        logger.log(&record(1)).await.unwrap();
        logger.log(&record(2)).await.unwrap();
    });

    assert_eq!(card.writes(), 0);
    assert_eq!(logger.pending(), format!("{}{}", line_of(1), line_of(2)).as_bytes());

    block_on(logger.flush()).unwrap();
    assert!(logger.pending().is_empty());
    assert_eq!(card.contents(), format!("{}{}", line_of(1), line_of(2)));
    assert_eq!(card.writes(), 1);
}

#[test]
fn elapsed_interval_triggers_flush() {
    let records = RecordQueue::new();
    let card = FakeCard::default();
    let config = Config {
        log_interval: Duration::from_millis(30),
        ..Config::DEFAULT
    };
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &config);

    records.try_send(record(1)).unwrap();
    block_on(logger.poll()).unwrap();
    assert_eq!(card.writes(), 0);

    block_on(Timer::after(Duration::from_millis(40)));
    records.try_send(record(2)).unwrap();
    block_on(logger.poll()).unwrap();

    assert_eq!(card.writes(), 1);
    assert_eq!(card.contents(), format!("{}{}", line_of(1), line_of(2)));
}

#[test]
fn idle_logger_flushes_when_the_interval_runs_out() {
    let records = RecordQueue::new();
    let card = FakeCard::default();
    let interval = Duration::from_millis(30);
    let config = Config {
        log_interval: interval,
        ..Config::DEFAULT
    };
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &config);

    records.try_send(record(1)).unwrap();
    block_on(logger.poll()).unwrap();
    assert_eq!(card.writes(), 0);

    // no further records: the pending line still reaches the card
    let start = Instant::now();
    block_on(logger.poll()).unwrap();
    assert!(start.elapsed() < interval + Duration::from_millis(40));
    assert_eq!(card.writes(), 1);
    assert_eq!(card.contents(), line_of(1));
    assert!(logger.pending().is_empty());
}

#[test]
fn full_buffer_is_flushed_before_it_overflows() {
    let records = RecordQueue::new();
    let card = FakeCard::default();
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &hourly());

    let line_len = line_of(100_000).len();
    let count = 2 * SINK_BUFFER_SIZE / line_len;
    block_on(async {
        for i in 0..count as u64 {
            logger.log(&record(100_000 + i)).await.unwrap();
        }
    });

    assert!(card.writes() >= 1);
    assert!(logger.pending().len() <= SINK_BUFFER_SIZE);
    // nothing lost or duplicated across the early flushes
    let mut all = card.contents().into_bytes();
    all.extend_from_slice(logger.pending());
    let expected: String = (0..count as u64).map(|i| line_of(100_000 + i)).collect();
    assert_eq!(String::from_utf8(all).unwrap(), expected);
}

#[test]
fn failed_flush_keeps_lines_for_the_next_attempt() {
    let records = RecordQueue::new();
    let card = FakeCard::default();
    let config = Config {
        log_interval: Duration::from_millis(0),
        ..Config::DEFAULT
    };
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &config);

    card.set_removed(true);
    assert_eq!(block_on(logger.log(&record(1))), Err(CardRemoved));
    assert_eq!(logger.pending(), line_of(1).as_bytes());

    card.set_removed(false);
    block_on(logger.log(&record(2))).unwrap();
    assert!(logger.pending().is_empty());
    assert_eq!(card.contents(), format!("{}{}", line_of(1), line_of(2)));
}

#[test]
fn lines_are_offered_to_telemetry_without_blocking() {
    let records = RecordQueue::new();
    let telemetry = TelemetryQueue::new();
    let card = FakeCard::default();
    let mut logger = RecordLogger::new(records.receiver(), card.clone(), &hourly())
        .with_telemetry(telemetry.sender());

    block_on(async {
        for i in 0..TELEMETRY_QUEUE_DEPTH as u64 + 3 {
            logger.log(&record(i)).await.unwrap();
        }
    });

    let mut sent = Vec::new();
    while let Ok(line) = telemetry.try_receive() {
        sent.push(line.as_str().to_owned());
    }
    let expected: Vec<_> = (0..TELEMETRY_QUEUE_DEPTH as u64).map(line_of).collect();
    assert_eq!(sent, expected);
    // the log itself keeps every line
    assert_eq!(
        logger.pending().len(),
        (0..TELEMETRY_QUEUE_DEPTH as u64 + 3)
            .map(|i| line_of(i).len())
            .sum::<usize>()
    );
}

#[test]
fn radio_transmits_queued_line() {
    static REQUESTS: RequestQueue<'static> = RequestQueue::new();
    static SLOT: ReplySlot = ReplySlot::new();
    static LINES: TelemetryQueue = TelemetryQueue::new();

    let line = FakeLine::new();
    let config = Config {
        mux_settle: Duration::from_millis(1),
        radio_timeout: Duration::from_millis(10),
        ..Config::DEFAULT
    };
    let mut arbiter = Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &config);
    let mut radio = RadioLoop::new(
        BusHandle::new(REQUESTS.sender(), &SLOT, &config),
        LINES.receiver(),
        &config,
    );

    let text = line_of(42);
    let mut queued = TelemetryLine::new();
    queued.push_str(&text).unwrap();
    LINES.try_send(queued).unwrap();

    match block_on(select(arbiter.run(), radio.poll())) {
        Either::First(_) => unreachable!(),
        Either::Second(result) => assert_eq!(result, Ok(())),
    }
    assert_eq!(line.writes(), [(Some(Device::Radio), text.into_bytes())]);
}

#[test]
fn gnss_poll_publishes_decoded_fix() {
    static REQUESTS: RequestQueue<'static> = RequestQueue::new();
    static SLOT: ReplySlot = ReplySlot::new();
    static FIXES: SampleQueue<GnssFix> = SampleQueue::new();

    let line = FakeLine::new();
    line.respond(Device::Gnss, |_| Some(GGA.to_vec()));
    line.set_chunk(16);

    let config = Config {
        mux_settle: Duration::from_millis(1),
        gnss_timeout: Duration::from_millis(20),
        gnss_poll: b"$PUBX,00*33\r\n",
        ..Config::DEFAULT
    };
    let mut arbiter = Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &config);
    let mut gnss = GnssLoop::new(
        BusHandle::new(REQUESTS.sender(), &SLOT, &config),
        NmeaCodec::new(),
        FIXES.sender(),
        &config,
    );

    let sample = match block_on(select(arbiter.run(), gnss.poll())) {
        Either::First(_) => unreachable!(),
        Either::Second(sample) => sample.unwrap(),
    };

    assert!((sample.value.latitude - 48.1173).abs() < 1e-4);
    assert!((sample.value.longitude - 11.516_667).abs() < 1e-4);
    assert_eq!(sample.value.satellites, 8);
    assert_eq!(FIXES.try_receive().ok(), Some(sample));
    assert_eq!(line.writes()[0].1, b"$PUBX,00*33\r\n");
}

#[test]
fn silent_gnss_gives_no_fix() {
    static REQUESTS: RequestQueue<'static> = RequestQueue::new();
    static SLOT: ReplySlot = ReplySlot::new();
    static FIXES: SampleQueue<GnssFix> = SampleQueue::new();

    let line = FakeLine::new();
    let config = Config {
        mux_settle: Duration::from_millis(1),
        gnss_timeout: Duration::from_millis(10),
        ..Config::DEFAULT
    };
    let mut arbiter = Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &config);
    let mut gnss = GnssLoop::new(
        BusHandle::new(REQUESTS.sender(), &SLOT, &config),
        NmeaCodec::new(),
        FIXES.sender(),
        &config,
    );

    match block_on(select(arbiter.run(), gnss.poll())) {
        Either::First(_) => unreachable!(),
        Either::Second(sample) => assert_eq!(sample, Err(Error::NoResponse)),
    }
    assert!(FIXES.try_receive().is_err());
}

fn gnss_config() -> Config {
    Config {
        mux_settle: Duration::from_millis(1),
        gnss_timeout: Duration::from_millis(10),
        ..Config::DEFAULT
    }
}

#[test]
fn receiver_without_fix_publishes_nothing() {
    static REQUESTS: RequestQueue<'static> = RequestQueue::new();
    static SLOT: ReplySlot = ReplySlot::new();
    static FIXES: SampleQueue<GnssFix> = SampleQueue::new();

    let line = FakeLine::new();
    line.respond(Device::Gnss, |_| {
        Some(b"$GPGGA,123519,4807.038,N,01131.000,E,0,08,0.9,545.4,M,46.9,M,,*46\r\n".to_vec())
    });

    let config = gnss_config();
    let mut arbiter = Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &config);
    let mut gnss = GnssLoop::new(
        BusHandle::new(REQUESTS.sender(), &SLOT, &config),
        NmeaCodec::new(),
        FIXES.sender(),
        &config,
    );

    match block_on(select(arbiter.run(), gnss.poll())) {
        Either::First(_) => unreachable!(),
        Either::Second(sample) => assert_eq!(sample, Err(Error::NoFix)),
    }
    assert!(FIXES.try_receive().is_err());
}

#[test]
fn sentence_cut_by_one_read_is_not_completed_by_the_next() {
    static REQUESTS: RequestQueue<'static> = RequestQueue::new();
    static SLOT: ReplySlot = ReplySlot::new();
    static FIXES: SampleQueue<GnssFix> = SampleQueue::new();

    let (head, tail) = GGA.split_at(GGA.len() - 20);
    let mut replies = vec![head.to_vec(), tail.to_vec()].into_iter();
    let line = FakeLine::new();
    line.respond(Device::Gnss, move |_| replies.next());

    let config = gnss_config();
    let mut arbiter = Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &config);
    let mut gnss = GnssLoop::new(
        BusHandle::new(REQUESTS.sender(), &SLOT, &config),
        NmeaCodec::new(),
        FIXES.sender(),
        &config,
    );

    let polls = async { (gnss.poll().await, gnss.poll().await) };
    let (first, second) = match block_on(select(arbiter.run(), polls)) {
        Either::First(_) => unreachable!(),
        Either::Second(results) => results,
    };

    assert_eq!(first, Err(Error::NoResponse));
    assert_eq!(second, Err(Error::NoResponse));
    assert_eq!(line.writes().len(), 2);
    assert!(FIXES.try_receive().is_err());
}

const SURVEY: Config = Config {
    sample_interval: Duration::from_millis(100),
    log_interval: Duration::from_millis(0),
    correlation_window: Duration::from_millis(200),
    gnss_timeout: Duration::from_millis(20),
    sonar_timeout: Duration::from_millis(20),
    radio_timeout: Duration::from_millis(20),
    mux_settle: Duration::from_millis(1),
    reply_grace: Duration::from_millis(500),
    ..Config::DEFAULT
};

static REQUESTS: RequestQueue<'static> = RequestQueue::new();
static GNSS_SLOT: ReplySlot = ReplySlot::new();
static SONAR_SLOT: ReplySlot = ReplySlot::new();
static RADIO_SLOT: ReplySlot = ReplySlot::new();
static FIXES: SampleQueue<GnssFix> = SampleQueue::new();
static DEPTHS: SampleQueue<Distance> = SampleQueue::new();
static RECORDS: RecordQueue = RecordQueue::new();
static TELEMETRY: TelemetryQueue = TelemetryQueue::new();

static LOGGED: Signal<CriticalSectionRawMutex, String> = Signal::new();
static RADIOED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[embassy_executor::task]
async fn bus_task(line: FakeLine) {
    Arbiter::new(line.serial(), line.mux(), REQUESTS.receiver(), &SURVEY)
        .run()
        .await
}

#[embassy_executor::task]
async fn gnss_task() {
    let handle = BusHandle::new(REQUESTS.sender(), &GNSS_SLOT, &SURVEY);
    GnssLoop::new(handle, NmeaCodec::new(), FIXES.sender(), &SURVEY)
        .run()
        .await
}

#[embassy_executor::task]
async fn sonar_task() {
    let handle = BusHandle::new(REQUESTS.sender(), &SONAR_SLOT, &SURVEY);
    SonarLoop::new(handle, DEPTHS.sender(), &SURVEY).run().await
}

#[embassy_executor::task]
async fn aggregator_task() {
    Aggregator::new(
        FIXES.receiver(),
        DEPTHS.receiver(),
        RECORDS.sender(),
        &SURVEY,
    )
    .run()
    .await
}

#[embassy_executor::task]
async fn logger_task(card: FakeCard) {
    let mut logger = RecordLogger::new(RECORDS.receiver(), card.clone(), &SURVEY)
        .with_telemetry(TELEMETRY.sender());
    for _ in 0..3 {
        logger.poll().await.unwrap();
    }
    LOGGED.signal(card.contents());
}

#[embassy_executor::task]
async fn radio_task() {
    let handle = BusHandle::new(REQUESTS.sender(), &RADIO_SLOT, &SURVEY);
    let mut radio = RadioLoop::new(handle, TELEMETRY.receiver(), &SURVEY);
    radio.poll().await.unwrap();
    RADIOED.signal(());
}

#[test]
fn survey_records_reach_the_card_and_the_radio() {
    static EXECUTOR: StaticCell<Executor> = StaticCell::new();

    let line = FakeLine::new();
    line.respond(Device::Gnss, |_| Some(GGA.to_vec()));
    line.respond(Device::Sonar, |tx| {
        let mut parser = Parser::new();
        parser.feed(tx);
        let packet = parser.packet()?;
        let route = packet.route.reversed();
        Some(if packet.message_id == id::GENERAL_REQUEST {
            message(&ping(4_200), route)
        } else {
            message(
                &Ack {
                    acked_id: packet.message_id,
                },
                route,
            )
        })
    });

    let bus_line = line.clone();
    let card = FakeCard::default();
    let logger_card = card.clone();
    std::thread::spawn(move || {
        EXECUTOR.init_with(Executor::new).run(|spawner| {
            spawner.must_spawn(bus_task(bus_line));
            spawner.must_spawn(gnss_task());
            spawner.must_spawn(sonar_task());
            spawner.must_spawn(aggregator_task());
            spawner.must_spawn(logger_task(logger_card));
            spawner.must_spawn(radio_task());
        });
    });

    let logged = block_on(LOGGED.wait());
    block_on(RADIOED.wait());

    let lines: Vec<&str> = logged.lines().collect();
    assert_eq!(lines.len(), 3);
    let mut last_timestamp = 0;
    for text in &lines {
        let fields: Vec<&str> = text.split(',').collect();
        assert_eq!(fields[1..], ["48.117300", "11.516667", "4.20"]);
        let timestamp: u64 = fields[0].parse().unwrap();
        assert!(timestamp > last_timestamp);
        last_timestamp = timestamp;
    }

    let radioed: Vec<_> = line
        .writes()
        .into_iter()
        .filter(|(device, _)| *device == Some(Device::Radio))
        .collect();
    assert_eq!(radioed.len(), 1);
    assert_eq!(radioed[0].1, format!("{}\n", lines[0]).into_bytes());
    assert_eq!(card.contents(), logged);
}
