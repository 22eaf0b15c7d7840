//! Register map and bit-field helpers for the MLX90615.
//!
//! The device exposes two address spaces behind one command byte: the upper
//! nibble `0x20` selects RAM (volatile, live measurements) and `0x10` selects
//! EEPROM (non-volatile, calibration and configuration). EEPROM cells must be
//! erased before they accept a new value; see
//! [`RegisterTransport`](crate::transport::RegisterTransport).

use std::fmt;

use crc::{Crc, CRC_8_SMBUS};

/// Factory-default 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x5B;

/// Command prefix for RAM (volatile) registers.
pub const OP_RAM: u8 = 0x20;
/// Command prefix for EEPROM (non-volatile) registers.
pub const OP_EEPROM: u8 = 0x10;
/// Enter-sleep command. SCL must stay high while the device sleeps.
pub const OP_SLEEP: u8 = 0xC6;

const OP_MASK: u8 = 0xF0;

/// Bit 15 of a temperature word: the device flags the measurement as invalid.
pub const ERROR_FLAG: u16 = 0x8000;
/// Magnitude bits of a temperature or raw IR word.
pub const MAGNITUDE_MASK: u16 = 0x7FFF;

/// A device register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Raw IR data, sign and magnitude (RAM 0x05)
    RawIr = OP_RAM | 0x05,
    /// Ambient (die) temperature, 0.02 K/LSB (RAM 0x06)
    Ambient = OP_RAM | 0x06,
    /// Object temperature, 0.02 K/LSB (RAM 0x07)
    Object = OP_RAM | 0x07,
    /// Configuration word, IIR filter in bits 12-14 (EEPROM 0x02)
    Config = OP_EEPROM | 0x02,
    /// Emissivity, 16384 = 1.0 (EEPROM 0x03)
    Emissivity = OP_EEPROM | 0x03,
}

impl Register {
    /// Command byte sent on the bus.
    pub const fn command(self) -> u8 {
        self as u8
    }

    /// RAM registers reflect live sensor state and are single-phase reads.
    pub const fn is_volatile(self) -> bool {
        self.command() & OP_MASK == OP_RAM
    }

    /// Look up a register from its command byte.
    pub fn from_command(command: u8) -> Option<Self> {
        match command {
            c if c == Self::RawIr as u8 => Some(Self::RawIr),
            c if c == Self::Ambient as u8 => Some(Self::Ambient),
            c if c == Self::Object as u8 => Some(Self::Object),
            c if c == Self::Config as u8 => Some(Self::Config),
            c if c == Self::Emissivity as u8 => Some(Self::Emissivity),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::RawIr => "raw IR",
            Self::Ambient => "ambient temperature",
            Self::Object => "object temperature",
            Self::Config => "configuration",
            Self::Emissivity => "emissivity",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.command())
    }
}

/// Packed configuration register.
///
/// Only the IIR field has meaning to this driver. Every other bit belongs to
/// the device and must be written back exactly as it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRegister(pub u16);

impl ConfigRegister {
    /// Shift of the IIR filter field.
    pub const IIR_SHIFT: u16 = 12;
    /// Mask of the IIR filter field (bits 12-14).
    pub const IIR_MASK: u16 = 0x7 << Self::IIR_SHIFT;

    /// The raw 3-bit filter index.
    pub const fn iir_index(self) -> u8 {
        ((self.0 & Self::IIR_MASK) >> Self::IIR_SHIFT) as u8
    }

    /// Replace the filter index, preserving all other bits.
    ///
    /// `index` is truncated to 3 bits; callers validate it beforehand.
    pub const fn with_iir_index(self, index: u8) -> Self {
        let field = ((index as u16) << Self::IIR_SHIFT) & Self::IIR_MASK;
        Self((self.0 & !Self::IIR_MASK) | field)
    }

    /// The raw register word.
    pub const fn bits(self) -> u16 {
        self.0
    }
}

const SMBUS_PEC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// SMBus packet error code: CRC-8, polynomial x^8 + x^2 + x + 1, initial value 0.
pub fn pec(bytes: &[u8]) -> u8 {
    SMBUS_PEC.checksum(bytes)
}

/// Build the 4-byte SMBus write-word frame `[command, low, high, pec]`.
pub fn write_word_frame(address: u8, command: u8, value: u16) -> [u8; 4] {
    let [low, high] = value.to_le_bytes();
    let crc = pec(&[address << 1, command, low, high]);
    [command, low, high, crc]
}

/// Build the 2-byte sleep frame `[0xC6, pec]`.
pub fn sleep_frame(address: u8) -> [u8; 2] {
    [OP_SLEEP, pec(&[address << 1, OP_SLEEP])]
}
