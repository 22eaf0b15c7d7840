//! Driver for the Melexis MLX90615 infrared thermometer.
//!
//! The MLX90615 is a contactless temperature sensor on an SMBus-compatible
//! two-wire interface. It reports an ambient (die) temperature and an object
//! temperature, and keeps emissivity and an IIR filter setting in EEPROM.
//!
//! This crate works on top of any [`embedded_hal::i2c::I2c`] implementation
//! and adds:
//! - word-level register access with PEC-protected, two-phase EEPROM writes;
//! - fixed-point unit conversions that match the device's data sheet;
//! - a background sampling thread feeding a bounded tokio channel;
//! - a simulated device for tests and demos.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`Mlx90615`] - Device facade, shareable across threads
//! - [`Mlx90615Config`] - Address, timing and streaming defaults (Figment)
//! - `open_linux` - `/dev/i2c-N` support (feature `hardware`)
//!
//! ## Registers and Units
//! - [`registers`] - Register map, configuration word, PEC framing
//! - [`conversion`] - Temperature, emissivity and filter conversions
//! - [`RegisterTransport`] / [`EepromAccess`] - Locked bus access
//!
//! ## Streaming Acquisition
//! - [`SamplingEngine`] - Periodic, cancellable sampling thread
//! - [`SampleRecord`] - Timestamped snapshot with a fixed 16-byte encoding
//! - [`SamplingStats`] - Tick, publish and drop counters
//!
//! ## Testing
//! - [`mock::SimulatedMlx90615`] - Protocol-accurate simulated device with
//!   fault injection
//!
//! # Examples
//!
//! ## Single Reading
//!
//! ```
//! use daq_driver_mlx90615::mock::SimulatedMlx90615;
//! use daq_driver_mlx90615::{Channel, Mlx90615, Mlx90615Config};
//!
//! # fn example() -> daq_driver_mlx90615::Result<()> {
//! let device = Mlx90615::open(SimulatedMlx90615::new(), Mlx90615Config::default())?;
//!
//! let object = device.read_temperature(Channel::Object)?;
//! println!("Object: {}", object);
//! println!("Emissivity: {}", device.emissivity()?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Streaming
//!
//! ```
//! use std::time::Duration;
//! use daq_driver_mlx90615::mock::SimulatedMlx90615;
//! use daq_driver_mlx90615::{ChannelMask, Mlx90615, Mlx90615Config, SamplingConfig};
//!
//! # fn example() -> daq_driver_mlx90615::Result<()> {
//! let device = Mlx90615::open(SimulatedMlx90615::new(), Mlx90615Config::default())?;
//!
//! let mut rx = device.enable_streaming_with(SamplingConfig {
//!     channels: ChannelMask::all(),
//!     period: Duration::from_millis(20),
//!     queue_depth: 16,
//! })?;
//!
//! for _ in 0..3 {
//!     if let Some(record) = rx.blocking_recv() {
//!         println!("#{} @ {} ns: {:?}", record.sequence, record.timestamp_ns, record.encode());
//!     }
//! }
//!
//! device.disable_streaming()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod config;
pub mod conversion;
pub mod device;
pub mod error;
pub mod filter;
#[cfg(feature = "hardware")]
pub mod linux;
pub mod mock;
pub mod registers;
pub mod sampling;
pub mod transport;

pub use config::Mlx90615Config;
pub use conversion::{IntPlusMicro, IntPlusNano, Temperature};
pub use device::Mlx90615;
pub use error::{BusOperation, Mlx90615Error, Result};
#[cfg(feature = "hardware")]
pub use linux::open_linux;
pub use registers::{ConfigRegister, Register, DEFAULT_ADDRESS};
pub use sampling::{
    Channel, ChannelMask, SampleRecord, SamplingConfig, SamplingEngine, SamplingStats,
    StreamReceiver, StreamState,
};
pub use transport::{EepromAccess, RegisterTransport};
