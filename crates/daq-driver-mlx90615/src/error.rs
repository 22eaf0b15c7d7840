//! Error types for MLX90615 operations.
//!
//! Every failure the driver can observe is returned to the caller as an
//! [`Mlx90615Error`]. Bus failures are never retried here; a retry policy
//! belongs to whoever owns the bus.

use std::fmt;

use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

use crate::registers::Register;

/// Result type alias for MLX90615 operations.
pub type Result<T> = std::result::Result<T, Mlx90615Error>;

/// Bus phase that was in flight when a transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOperation {
    /// Word read
    Read,
    /// First phase of an EEPROM write (all-zero word)
    Erase,
    /// Second phase of an EEPROM write (actual value)
    Program,
    /// Single-byte command such as sleep
    Command,
}

impl fmt::Display for BusOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Erase => write!(f, "erase"),
            Self::Program => write!(f, "program"),
            Self::Command => write!(f, "command"),
        }
    }
}

/// Errors that can occur when working with an MLX90615.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Mlx90615Error {
    /// Transport failure: no acknowledge, arbitration loss, bus fault.
    ///
    /// A failed [`BusOperation::Program`] after a successful erase leaves the
    /// EEPROM cell in an indeterminate state.
    #[error("Bus error during {operation} of command 0x{command:02x}: {kind}")]
    Bus {
        operation: BusOperation,
        command: u8,
        kind: ErrorKind,
    },

    /// The device answered but flagged the measurement as unreliable
    #[error("Hardware fault: {register} reported 0x{raw:04x}")]
    HardwareFault { register: Register, raw: u16 },

    /// Value outside the accepted domain; rejected before any bus access
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Streaming was requested while a sampling thread already exists
    #[error("Sampling is already running")]
    AlreadyRunning,

    /// Streaming stop was requested but no sampling thread exists
    #[error("Sampling is not running")]
    NotRunning,

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Bus device could not be opened
    #[error("Failed to open bus '{path}': {message}")]
    DeviceNotFound { path: String, message: String },

    /// The operating system refused to start the sampling thread
    #[error("Failed to spawn sampling thread: {message}")]
    WorkerSpawn { message: String },

    /// The sampling thread panicked instead of returning
    #[error("Sampling thread panicked")]
    WorkerPanicked,
}

impl Mlx90615Error {
    pub(crate) fn bus(operation: BusOperation, command: u8, err: impl embedded_hal::i2c::Error) -> Self {
        Self::Bus {
            operation,
            command,
            kind: err.kind(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if this is a transport-level failure.
    pub fn is_bus_error(&self) -> bool {
        matches!(self, Self::Bus { .. })
    }

    /// Check if the device flagged a measurement as invalid.
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, Self::HardwareFault { .. })
    }

    /// Check if the caller supplied an out-of-domain value.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}
