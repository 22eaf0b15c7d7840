//! MLX90615 Streaming Tests
//!
//! Exercises the sampling engine against the simulated device: record layout,
//! lifecycle errors, tick failures, back-pressure and concurrency with
//! EEPROM writes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daq_driver_mlx90615::mock::{ErrorScenario, SimulatedMlx90615, DEFAULT_AMBIENT, DEFAULT_OBJECT};
use daq_driver_mlx90615::{
    Channel, ChannelMask, IntPlusNano, Mlx90615, Mlx90615Config, Mlx90615Error, Register,
    SampleRecord, SamplingConfig, StreamReceiver, StreamState,
};
use tokio::time::timeout;

// =============================================================================
// Helpers
// =============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn open(sim: &SimulatedMlx90615) -> Mlx90615<SimulatedMlx90615> {
    let config = Mlx90615Config {
        eeprom_settle: Duration::ZERO,
        ..Default::default()
    };
    Mlx90615::open(sim.clone(), config).unwrap()
}

fn fast(channels: ChannelMask) -> SamplingConfig {
    SamplingConfig {
        channels,
        period: Duration::from_millis(20),
        queue_depth: 64,
    }
}

async fn next(rx: &mut StreamReceiver) -> Option<SampleRecord> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for the stream")
}

async fn drain(rx: &mut StreamReceiver) -> Vec<SampleRecord> {
    let mut records = Vec::new();
    while let Some(record) = next(rx).await {
        records.push(record);
    }
    records
}

// =============================================================================
// Record delivery
// =============================================================================

#[tokio::test]
async fn streams_timestamped_records() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    assert_eq!(device.stream_state(), StreamState::Running);

    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(next(&mut rx).await.unwrap());
    }

    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.sequence, i as u64);
        assert_eq!(record.ambient, Some(DEFAULT_AMBIENT));
        assert_eq!(record.object, Some(DEFAULT_OBJECT));
    }
    assert!(records
        .windows(2)
        .all(|pair| pair[1].timestamp_ns > pair[0].timestamp_ns));

    let bytes = records[0].encode();
    assert_eq!(&bytes[..2], &DEFAULT_AMBIENT.to_le_bytes());
    assert_eq!(&bytes[2..4], &DEFAULT_OBJECT.to_le_bytes());
    assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
    assert_eq!(&bytes[8..], &records[0].timestamp_ns.to_le_bytes());

    device.disable_streaming().unwrap();
}

#[test]
fn three_periods_yield_three_records() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let period = Duration::from_millis(200);
    let mut rx = device
        .enable_streaming_with(SamplingConfig {
            period,
            ..fast(ChannelMask::all())
        })
        .unwrap();

    // Ticks at 0, 200 and 400 ms; stop halfway to the fourth
    thread::sleep(period * 5 / 2);
    device.disable_streaming().unwrap();

    let mut records = Vec::new();
    while let Some(record) = rx.blocking_recv() {
        records.push(record);
    }
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r.ambient.is_some() && r.object.is_some()));
    assert!(records
        .windows(2)
        .all(|pair| pair[1].timestamp_ns > pair[0].timestamp_ns));
}

#[tokio::test]
async fn single_channel_stream() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device.enable_streaming_with(fast(ChannelMask::OBJECT)).unwrap();

    let record = next(&mut rx).await.unwrap();
    assert_eq!(record.ambient, None);
    assert_eq!(record.object, Some(DEFAULT_OBJECT));
    assert_eq!(record.channels(), ChannelMask::OBJECT);
    let [low, high] = DEFAULT_OBJECT.to_le_bytes();
    assert_eq!(&record.encode()[..4], &[low, high, 0, 0]);
    assert!(record.temperature(Channel::Object).is_some());

    device.disable_streaming().unwrap();
}

#[tokio::test]
async fn values_track_the_device() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device.enable_streaming_with(fast(ChannelMask::OBJECT)).unwrap();

    next(&mut rx).await.unwrap();
    sim.set_register(Register::Object, 16_000);

    let mut seen = false;
    for _ in 0..20 {
        if next(&mut rx).await.unwrap().object == Some(16_000) {
            seen = true;
            break;
        }
    }
    assert!(seen);

    device.disable_streaming().unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn disable_ends_stream() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    next(&mut rx).await.unwrap();

    device.disable_streaming().unwrap();
    assert_eq!(device.stream_state(), StreamState::Idle);

    // Anything already queued drains, then the stream ends
    drain(&mut rx).await;
    let stats = device.stream_stats();
    assert!(stats.records_published >= 1);
    assert_eq!(stats.last_error, None);
}

#[test]
fn lifecycle_errors() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);

    assert_eq!(device.disable_streaming(), Err(Mlx90615Error::NotRunning));
    assert!(device
        .enable_streaming(ChannelMask::empty())
        .unwrap_err()
        .is_invalid_argument());

    let _rx = device.enable_streaming(ChannelMask::all()).unwrap();
    assert_eq!(
        device.enable_streaming(ChannelMask::all()).unwrap_err(),
        Mlx90615Error::AlreadyRunning
    );
    assert_eq!(device.sleep(), Err(Mlx90615Error::AlreadyRunning));
    assert!(!sim.is_asleep());

    device.disable_streaming().unwrap();
    assert_eq!(device.disable_streaming(), Err(Mlx90615Error::NotRunning));
}

#[tokio::test]
async fn drop_stops_sampling() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    next(&mut rx).await.unwrap();

    drop(device);
    drain(&mut rx).await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn bus_failure_ends_stream() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);

    // Two transfers per tick: the third tick fails on its first read
    sim.inject(ErrorScenario::FailAfterN { count: 4 });
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();

    let records = drain(&mut rx).await;
    assert_eq!(records.len(), 2);
    assert_eq!(device.stream_state(), StreamState::Idle);

    let stats = device.stream_stats();
    assert_eq!(stats.ticks, 2);
    assert!(stats.last_error.as_ref().is_some_and(Mlx90615Error::is_bus_error));

    let err = device.disable_streaming().unwrap_err();
    assert!(err.is_bus_error());
    assert_eq!(device.disable_streaming(), Err(Mlx90615Error::NotRunning));
}

#[tokio::test]
async fn error_flag_ends_stream() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    sim.inject(ErrorScenario::ErrorFlag {
        register: Register::Object,
    });

    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    assert!(drain(&mut rx).await.is_empty());

    assert_eq!(
        device.disable_streaming(),
        Err(Mlx90615Error::HardwareFault {
            register: Register::Object,
            raw: DEFAULT_OBJECT | 0x8000,
        })
    );
}

#[tokio::test]
async fn restart_after_failure() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    sim.inject(ErrorScenario::CommunicationLoss);

    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    assert!(drain(&mut rx).await.is_empty());

    // The dead thread is reaped without calling disable first
    sim.clear_faults();
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();
    assert_eq!(next(&mut rx).await.unwrap().sequence, 0);
    assert_eq!(device.stream_stats().last_error, None);

    device.disable_streaming().unwrap();
}

// =============================================================================
// Back-pressure and concurrency
// =============================================================================

#[tokio::test]
async fn full_queue_drops_records() {
    let sim = SimulatedMlx90615::new();
    let device = open(&sim);
    let mut rx = device
        .enable_streaming_with(SamplingConfig {
            channels: ChannelMask::all(),
            period: Duration::from_millis(5),
            queue_depth: 1,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    device.disable_streaming().unwrap();

    let records = drain(&mut rx).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sequence, 0);

    let stats = device.stream_stats();
    assert!(stats.records_dropped > 0);
    assert_eq!(stats.records_published, 1);
    assert_eq!(stats.ticks, stats.records_published + stats.records_dropped);
}

#[test]
fn sampling_continues_during_eeprom_write() {
    let sim = SimulatedMlx90615::new();
    let config = Mlx90615Config {
        eeprom_settle: Duration::from_millis(300),
        ..Default::default()
    };
    let device = Arc::new(Mlx90615::open(sim.clone(), config).unwrap());
    let mut rx = device.enable_streaming_with(fast(ChannelMask::all())).unwrap();

    let writer = {
        let device = Arc::clone(&device);
        thread::spawn(move || device.set_emissivity(IntPlusNano::new(0, 950_000_000)))
    };

    // Two settle delays keep the writer busy for at least 600 ms
    for _ in 0..5 {
        assert!(rx.blocking_recv().is_some());
    }
    assert!(!writer.is_finished());

    writer.join().unwrap().unwrap();
    assert_eq!(sim.register(Register::Emissivity), 15_564);
    device.disable_streaming().unwrap();
}
