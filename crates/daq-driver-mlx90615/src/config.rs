//! Device configuration.
//!
//! Values are layered with Figment: built-in defaults, then an optional TOML
//! file, then `MLX90615_*` environment variables.
//!
//! ```toml
//! address = 0x5b
//! eeprom_settle = "10ms"
//! startup_settle = "300ms"
//! sampling_period = "100ms"
//! queue_depth = 64
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Mlx90615Error, Result};
use crate::registers::DEFAULT_ADDRESS;
use crate::sampling::{ChannelMask, SamplingConfig};

/// Prefix of environment overrides, e.g. `MLX90615_SAMPLING_PERIOD=250ms`.
pub const ENV_PREFIX: &str = "MLX90615_";

/// Static configuration of one MLX90615.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mlx90615Config {
    /// 7-bit bus address
    pub address: u8,
    /// Wait after each EEPROM erase and program phase
    #[serde(with = "humantime_serde")]
    pub eeprom_settle: Duration,
    /// Time the device needs after wake-up before it answers
    #[serde(with = "humantime_serde")]
    pub startup_settle: Duration,
    /// Streaming tick period
    #[serde(with = "humantime_serde")]
    pub sampling_period: Duration,
    /// Streaming queue capacity, in records
    pub queue_depth: usize,
}

impl Default for Mlx90615Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            eeprom_settle: Duration::from_millis(10),
            startup_settle: Duration::from_millis(300),
            sampling_period: Duration::from_millis(100),
            queue_depth: 64,
        }
    }
}

impl Mlx90615Config {
    /// Load defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(Mlx90615Error::InvalidConfig {
                    message: format!("config file not found: {}", path.display()),
                });
            }
            debug!("Loading MLX90615 config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| Mlx90615Error::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(0x01..=0x7F).contains(&self.address) {
            return Err(Mlx90615Error::InvalidConfig {
                message: format!("address 0x{:02x} is not a 7-bit address", self.address),
            });
        }
        if self.sampling_period.is_zero() {
            return Err(Mlx90615Error::InvalidConfig {
                message: "sampling_period must be non-zero".to_string(),
            });
        }
        if self.queue_depth == 0 {
            return Err(Mlx90615Error::InvalidConfig {
                message: "queue_depth must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Streaming parameters for `channels` with this configuration's timing.
    pub fn sampling(&self, channels: ChannelMask) -> SamplingConfig {
        SamplingConfig {
            channels,
            period: self.sampling_period,
            queue_depth: self.queue_depth,
        }
    }
}
