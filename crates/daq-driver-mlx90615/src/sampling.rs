//! Periodic background sampling.
//!
//! A [`SamplingEngine`] owns at most one sampling thread per device. Each tick
//! the thread reads the enabled temperature channels, stamps them with one
//! monotonic timestamp and publishes a [`SampleRecord`] to a bounded channel.
//!
//! ```text
//!   enable_streaming ──► Idle ─► Starting ─► Running ──┐
//!                                              │      │ tick: read ─► record ─► try_send
//!   disable_streaming ─────────────────────► Stopping │      ▲                     │
//!                                              │      └──────┴── wait (interruptible)
//!                                              ▼
//!                                             Idle ◄── tick failure (stream ends)
//! ```
//!
//! # Guarantees
//!
//! - Ticks never overlap; the next tick is scheduled one period after the
//!   previous one started.
//! - A record is only published once every enabled channel was read without
//!   error. A failed tick publishes nothing and ends the stream.
//! - [`SamplingEngine::stop`] joins the thread, so no record is published
//!   after it returns.
//! - The producer never blocks on a slow consumer: a full queue drops the
//!   record and counts it.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use embedded_hal::i2c::I2c;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::conversion::{raw_to_temperature, Temperature};
use crate::error::{Mlx90615Error, Result};
use crate::registers::Register;
use crate::transport::RegisterTransport;

bitflags! {
    /// Channels captured by each sampling tick, in scan order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u8 {
        /// Ambient (die) temperature, scan index 0
        const AMBIENT = 1 << 0;
        /// Object temperature, scan index 1
        const OBJECT = 1 << 1;
    }
}

impl FromStr for ChannelMask {
    type Err = Mlx90615Error;

    /// Parse a comma-separated list such as `ambient,object`.
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(ChannelMask::empty(), |mask, name| {
                let channel: Channel = name.parse()?;
                Ok(mask | channel.mask())
            })
    }
}

/// A single temperature channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Sensor die temperature
    Ambient,
    /// Temperature of the object in the field of view
    Object,
}

impl Channel {
    /// Register holding this channel's measurement.
    pub const fn register(self) -> Register {
        match self {
            Self::Ambient => Register::Ambient,
            Self::Object => Register::Object,
        }
    }

    /// Bit of this channel in a [`ChannelMask`].
    pub const fn mask(self) -> ChannelMask {
        match self {
            Self::Ambient => ChannelMask::AMBIENT,
            Self::Object => ChannelMask::OBJECT,
        }
    }
}

impl FromStr for Channel {
    type Err = Mlx90615Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ambient" | "ta" => Ok(Self::Ambient),
            "object" | "tobj" => Ok(Self::Object),
            other => Err(Mlx90615Error::invalid_argument(format!(
                "unknown channel '{}' (expected 'ambient' or 'object')",
                other
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambient => write!(f, "ambient"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// One timestamped snapshot of the enabled channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    /// Raw ambient word, if the channel is enabled
    pub ambient: Option<u16>,
    /// Raw object word, if the channel is enabled
    pub object: Option<u16>,
    /// Nanoseconds since the device handle was opened, taken once per tick
    pub timestamp_ns: i64,
    /// Tick index since streaming started; gaps mean dropped records
    pub sequence: u64,
}

impl SampleRecord {
    /// Size of [`Self::encode`] output.
    pub const ENCODED_LEN: usize = 16;

    /// Byte offset of the timestamp within the encoded record.
    pub const TIMESTAMP_OFFSET: usize = 8;

    /// Scan layout: enabled channels as consecutive little-endian `u16`
    /// from byte 0, zero padding, little-endian `i64` timestamp at byte 8.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        for (slot, value) in [self.ambient, self.object].into_iter().flatten().enumerate() {
            out[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_le_bytes());
        }
        out[Self::TIMESTAMP_OFFSET..].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out
    }

    /// Channels present in this record.
    pub fn channels(&self) -> ChannelMask {
        let mut mask = ChannelMask::empty();
        mask.set(ChannelMask::AMBIENT, self.ambient.is_some());
        mask.set(ChannelMask::OBJECT, self.object.is_some());
        mask
    }

    /// Converted temperature of `channel`, if present.
    pub fn temperature(&self, channel: Channel) -> Option<Temperature> {
        let raw = match channel {
            Channel::Ambient => self.ambient,
            Channel::Object => self.object,
        }?;
        raw_to_temperature(channel.register(), raw).ok()
    }
}

/// Receiver end of a sampling stream.
///
/// Yields `None` once the sampling thread has exited, whether it was stopped
/// or a tick failed.
pub type StreamReceiver = mpsc::Receiver<SampleRecord>;

/// Parameters of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Channels read each tick
    pub channels: ChannelMask,
    /// Tick period
    pub period: Duration,
    /// Capacity of the consumer queue, in records
    pub queue_depth: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            channels: ChannelMask::all(),
            period: Duration::from_millis(100),
            queue_depth: 64,
        }
    }
}

impl SamplingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Mlx90615Error::invalid_argument(
                "at least one channel must be enabled",
            ));
        }
        if self.period.is_zero() {
            return Err(Mlx90615Error::invalid_argument("sampling period must be non-zero"));
        }
        if self.queue_depth == 0 {
            return Err(Mlx90615Error::invalid_argument("queue depth must be greater than 0"));
        }
        Ok(())
    }
}

/// Lifecycle of the sampling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No sampling thread
    Idle = 0,
    /// Thread spawn requested
    Starting = 1,
    /// Periodic sampling active
    Running = 2,
    /// Stop requested, waiting for the thread to exit
    Stopping = 3,
}

impl StreamState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Statistics of the current (or most recent) streaming session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplingStats {
    /// Ticks that produced a record
    pub ticks: u64,
    /// Records accepted by the consumer queue
    pub records_published: u64,
    /// Records dropped because the queue was full
    pub records_dropped: u64,
    /// Error that ended the session, if any
    pub last_error: Option<Mlx90615Error>,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    last_error: Mutex<Option<Mlx90615Error>>,
}

impl Counters {
    fn reset(&self) {
        self.ticks.store(0, Ordering::SeqCst);
        self.published.store(0, Ordering::SeqCst);
        self.dropped.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
    }
}

/// Cancellation token the sampling thread waits on between ticks.
#[derive(Default)]
struct StopSignal {
    requested: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn request(&self) {
        *self.requested.lock() = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock()
    }

    /// Sleep until `deadline` or a stop request. Returns true if stopped.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut requested = self.requested.lock();
        while !*requested {
            if self.wake.wait_until(&mut requested, deadline).timed_out() {
                break;
            }
        }
        *requested
    }
}

struct Worker {
    handle: JoinHandle<Result<()>>,
    stop: Arc<StopSignal>,
}

/// Owner of the sampling thread for one device.
pub struct SamplingEngine {
    state: Arc<AtomicU8>,
    worker: Mutex<Option<Worker>>,
    counters: Arc<Counters>,
    epoch: Instant,
}

impl SamplingEngine {
    /// Create an idle engine. Record timestamps count from `epoch`.
    pub fn new(epoch: Instant) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(StreamState::Idle as u8)),
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            epoch,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        StreamState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Check if a sampling thread is active.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), StreamState::Starting | StreamState::Running)
    }

    /// Snapshot of the session statistics.
    pub fn stats(&self) -> SamplingStats {
        SamplingStats {
            ticks: self.counters.ticks.load(Ordering::SeqCst),
            records_published: self.counters.published.load(Ordering::SeqCst),
            records_dropped: self.counters.dropped.load(Ordering::SeqCst),
            last_error: self.counters.last_error.lock().clone(),
        }
    }

    /// Spawn the sampling thread.
    ///
    /// Fails with [`Mlx90615Error::AlreadyRunning`] if a thread is active. A
    /// thread that already ended on a tick failure is reaped first.
    pub fn start<I2C>(
        &self,
        transport: Arc<RegisterTransport<I2C>>,
        config: SamplingConfig,
    ) -> Result<StreamReceiver>
    where
        I2C: I2c + Send + 'static,
    {
        config.validate()?;

        let mut worker = self.worker.lock();
        if self.is_running() {
            return Err(Mlx90615Error::AlreadyRunning);
        }
        if let Some(dead) = worker.take() {
            if let Err(e) = join(dead.handle) {
                debug!(error = %e, "Reaped failed sampling thread");
            }
        }

        self.state.store(StreamState::Starting as u8, Ordering::SeqCst);
        self.counters.reset();

        let (sender, receiver) = mpsc::channel(config.queue_depth);
        let stop = Arc::new(StopSignal::default());
        let address = transport.address();
        let task = SamplingTask {
            transport,
            config,
            sender,
            stop: Arc::clone(&stop),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            epoch: self.epoch,
        };

        let handle = thread::Builder::new()
            .name(format!("mlx90615@{:#04x}-{}ms", address, config.period.as_millis()))
            .spawn(move || task.run())
            .map_err(|e| {
                self.state.store(StreamState::Idle as u8, Ordering::SeqCst);
                Mlx90615Error::WorkerSpawn {
                    message: e.to_string(),
                }
            })?;

        // The thread may already have failed and marked itself idle.
        let _ = self.state.compare_exchange(
            StreamState::Starting as u8,
            StreamState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        *worker = Some(Worker { handle, stop });

        info!(
            address,
            channels = ?config.channels,
            freq_hz = 1.0 / config.period.as_secs_f64(),
            "Started sampling"
        );
        Ok(receiver)
    }

    /// Signal the sampling thread to stop and wait for it to exit.
    ///
    /// Returns the error that ended the thread if a tick failed before the
    /// stop request, or [`Mlx90615Error::NotRunning`] if no thread exists.
    pub fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let Some(Worker { handle, stop }) = worker.take() else {
            return Err(Mlx90615Error::NotRunning);
        };

        self.state.store(StreamState::Stopping as u8, Ordering::SeqCst);
        stop.request();
        let result = join(handle);
        self.state.store(StreamState::Idle as u8, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            ticks = stats.ticks,
            published = stats.records_published,
            dropped = stats.records_dropped,
            "Stopped sampling"
        );
        result
    }

    /// Stop the thread if one exists; a missing thread is not an error.
    pub fn shutdown(&self) -> Result<()> {
        match self.stop() {
            Err(Mlx90615Error::NotRunning) => Ok(()),
            other => other,
        }
    }
}

impl Drop for SamplingEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error stopping sampling on drop: {}", e);
        }
    }
}

fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.join().map_err(|_| {
        error!("Sampling thread panicked");
        Mlx90615Error::WorkerPanicked
    })?
}

/// State moved into the sampling thread.
struct SamplingTask<I2C> {
    transport: Arc<RegisterTransport<I2C>>,
    config: SamplingConfig,
    sender: mpsc::Sender<SampleRecord>,
    stop: Arc<StopSignal>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    epoch: Instant,
}

impl<I2C: I2c> SamplingTask<I2C> {
    fn run(self) -> Result<()> {
        let result = self.sample_loop();
        if let Err(e) = &result {
            warn!(error = %e, "Sampling tick failed, ending stream");
            *self.counters.last_error.lock() = Some(e.clone());
        }
        self.state.store(StreamState::Idle as u8, Ordering::SeqCst);
        debug!("Sampling thread exiting");
        result
    }

    fn sample_loop(&self) -> Result<()> {
        let mut sequence = 0u64;
        let mut next_tick = Instant::now();

        loop {
            if self.stop.is_requested() {
                return Ok(());
            }

            let record = self.sample(sequence)?;
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
            sequence += 1;

            match self.sender.try_send(record) {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::SeqCst);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                    trace!(sequence = record.sequence, "Dropped record (queue full)");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Stream consumer went away");
                    return Ok(());
                }
            }

            next_tick += self.config.period;
            let now = Instant::now();
            if next_tick < now {
                trace!(late_by = ?(now - next_tick), "Sampling overran its period");
                next_tick = now;
            }
            if self.stop.wait_until(next_tick) {
                return Ok(());
            }
        }
    }

    fn sample(&self, sequence: u64) -> Result<SampleRecord> {
        let timestamp_ns = i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX);
        let channels = self.config.channels;

        let ambient = channels
            .contains(ChannelMask::AMBIENT)
            .then(|| self.transport.read_channel(Register::Ambient))
            .transpose()?;
        let object = channels
            .contains(ChannelMask::OBJECT)
            .then(|| self.transport.read_channel(Register::Object))
            .transpose()?;

        trace!(sequence, ?ambient, ?object, "Sampled");
        Ok(SampleRecord {
            ambient,
            object,
            timestamp_ns,
            sequence,
        })
    }
}
