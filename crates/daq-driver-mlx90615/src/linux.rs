//! Linux `/dev/i2c-N` support.

use std::path::Path;

use linux_embedded_hal::I2cdev;
use tracing::debug;

use crate::config::Mlx90615Config;
use crate::device::Mlx90615;
use crate::error::{Mlx90615Error, Result};

/// Open the MLX90615 on the Linux I2C adapter at `path`.
///
/// # Example
///
/// ```rust,ignore
/// let device = open_linux("/dev/i2c-1", Mlx90615Config::default())?;
/// println!("{}", device.read_temperature(Channel::Object)?);
/// ```
pub fn open_linux(path: impl AsRef<Path>, config: Mlx90615Config) -> Result<Mlx90615<I2cdev>> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Opening I2C adapter");
    let bus = I2cdev::new(path).map_err(|e| Mlx90615Error::DeviceNotFound {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Mlx90615::open(bus, config)
}
