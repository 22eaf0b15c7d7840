//! Device facade.
//!
//! [`Mlx90615`] ties the register transport, the conversions, the
//! configuration-register editor and the sampling engine together behind one
//! handle. Every method takes `&self`; the handle can be shared between
//! threads behind an `Arc`.
//!
//! Direct reads while streaming are allowed and each one is atomic on the bus,
//! but a sequence of direct reads is not a consistent snapshot with respect to
//! the sampling thread.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use embedded_hal::i2c::I2c;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Mlx90615Config;
use crate::conversion::{
    self, bandwidth_to_filter_index, decode_raw_ir, emissivity_to_raw, filter_index_to_bandwidth,
    raw_to_emissivity, raw_to_temperature, IntPlusMicro, IntPlusNano, Temperature,
};
use crate::error::{Mlx90615Error, Result};
use crate::filter;
use crate::registers::Register;
use crate::sampling::{
    Channel, ChannelMask, SamplingConfig, SamplingEngine, SamplingStats, StreamReceiver, StreamState,
};
use crate::transport::RegisterTransport;

/// Handle to one MLX90615.
pub struct Mlx90615<I2C> {
    transport: Arc<RegisterTransport<I2C>>,
    sampling: SamplingEngine,
    config: Mlx90615Config,
    ready_at: Mutex<Option<Instant>>,
}

impl<I2C> Mlx90615<I2C>
where
    I2C: I2c + Send + 'static,
{
    /// Take ownership of `bus` and bind to the device at `config.address`.
    ///
    /// No transfer happens here; the first bus error surfaces on first use.
    pub fn open(bus: I2C, config: Mlx90615Config) -> Result<Self> {
        config.validate()?;
        let transport = RegisterTransport::new(bus, config.address, config.eeprom_settle);
        info!(address = config.address, "Opened MLX90615");
        Ok(Self {
            transport: Arc::new(transport),
            sampling: SamplingEngine::new(Instant::now()),
            config,
            ready_at: Mutex::new(None),
        })
    }

    /// 7-bit bus address.
    pub fn address(&self) -> u8 {
        self.transport.address()
    }

    /// Configuration the handle was opened with.
    pub fn config(&self) -> &Mlx90615Config {
        &self.config
    }

    /// Read a temperature channel's raw word, rejecting flagged measurements.
    pub fn read_raw(&self, channel: Channel) -> Result<u16> {
        self.wait_ready();
        self.transport.read_channel(channel.register())
    }

    /// Read and convert a temperature channel.
    pub fn read_temperature(&self, channel: Channel) -> Result<Temperature> {
        let raw = self.read_raw(channel)?;
        raw_to_temperature(channel.register(), raw)
    }

    /// Read the signed raw IR value.
    pub fn read_raw_ir(&self) -> Result<i16> {
        self.wait_ready();
        self.transport.read_word(Register::RawIr).map(decode_raw_ir)
    }

    /// Offset added to raw temperature words before scaling.
    pub const fn temperature_offset(&self) -> IntPlusMicro {
        conversion::TEMPERATURE_OFFSET
    }

    /// Milli-degrees per raw temperature LSB.
    pub const fn temperature_scale(&self) -> i32 {
        conversion::TEMPERATURE_SCALE
    }

    /// Read the emissivity setting.
    pub fn emissivity(&self) -> Result<IntPlusNano> {
        self.wait_ready();
        let raw = self.transport.eeprom().read_word(Register::Emissivity)?;
        Ok(raw_to_emissivity(raw))
    }

    /// Store a new emissivity in `[0.0, 1.0]`.
    ///
    /// Out-of-domain values are rejected without touching the bus.
    pub fn set_emissivity(&self, value: IntPlusNano) -> Result<()> {
        let raw = emissivity_to_raw(value)?;
        self.wait_ready();
        self.transport.eeprom().write_word(Register::Emissivity, raw)?;
        info!(emissivity = %value, raw, "Updated emissivity");
        Ok(())
    }

    /// Current IIR filter index (1-7).
    pub fn filter_index(&self) -> Result<u8> {
        self.wait_ready();
        filter::filter_index(&self.transport)
    }

    /// Select IIR filter index (1-7).
    pub fn set_filter_index(&self, index: u8) -> Result<()> {
        conversion::validate_filter_index(index)?;
        self.wait_ready();
        filter::set_filter_index(&self.transport, index).map(|_| ())
    }

    /// Current filter bandwidth.
    pub fn filter_bandwidth(&self) -> Result<IntPlusMicro> {
        filter_index_to_bandwidth(self.filter_index()?)
    }

    /// Select the filter whose bandwidth matches `value` truncated to whole percent.
    pub fn set_filter_bandwidth(&self, value: IntPlusMicro) -> Result<()> {
        let index = bandwidth_to_filter_index(value)?;
        self.set_filter_index(index)
    }

    /// Bandwidths accepted by [`Self::set_filter_bandwidth`].
    pub const fn available_filter_bandwidths(&self) -> &'static str {
        conversion::available_filter_bandwidths()
    }

    /// Start streaming `channels` with the configured period and queue depth.
    pub fn enable_streaming(&self, channels: ChannelMask) -> Result<StreamReceiver> {
        self.enable_streaming_with(self.config.sampling(channels))
    }

    /// Start streaming with explicit parameters.
    pub fn enable_streaming_with(&self, config: SamplingConfig) -> Result<StreamReceiver> {
        config.validate()?;
        self.wait_ready();
        self.sampling.start(Arc::clone(&self.transport), config)
    }

    /// Stop streaming and wait for the sampling thread to exit.
    ///
    /// Returns the error that ended the stream early, if any.
    pub fn disable_streaming(&self) -> Result<()> {
        self.sampling.stop()
    }

    /// Current streaming state.
    pub fn stream_state(&self) -> StreamState {
        self.sampling.state()
    }

    /// Statistics of the current or last streaming session.
    pub fn stream_stats(&self) -> SamplingStats {
        self.sampling.stats()
    }

    /// Put the device into sleep mode.
    ///
    /// Refused while streaming. The device stays unreachable until it is
    /// woken externally and [`Self::notify_wakeup`] is called.
    pub fn sleep(&self) -> Result<()> {
        if self.sampling.is_running() {
            return Err(Mlx90615Error::AlreadyRunning);
        }
        self.transport.sleep()?;
        info!(address = self.address(), "MLX90615 entering sleep");
        Ok(())
    }

    /// Record that the device was just woken. The next bus access waits for
    /// the configured start-up time first.
    pub fn notify_wakeup(&self) {
        *self.ready_at.lock() = Some(Instant::now() + self.config.startup_settle);
        debug!(settle = ?self.config.startup_settle, "Device wake-up noted");
    }

    /// Stop streaming and hand back the bus.
    pub fn close(self) -> Result<I2C> {
        let Self {
            transport,
            sampling,
            ..
        } = self;

        if let Err(e) = sampling.shutdown() {
            warn!(error = %e, "Stream had failed before close");
        }
        drop(sampling);

        let transport = Arc::try_unwrap(transport).map_err(|_| Mlx90615Error::AlreadyRunning)?;
        info!(address = transport.address(), "Closed MLX90615");
        Ok(transport.release())
    }

    fn wait_ready(&self) {
        let mut ready_at = self.ready_at.lock();
        if let Some(deadline) = ready_at.take() {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
    }
}
