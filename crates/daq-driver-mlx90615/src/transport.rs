//! Word-level register access over I2C/SMBus.
//!
//! Reads are plain SMBus "read word" transfers. Writes always carry a PEC
//! byte, because the device silently discards writes without one.
//!
//! EEPROM writes need an erase first. The two phases stay separate here
//! ([`EepromAccess::erase_word`], [`EepromAccess::program_word`]) so a
//! failure between them is reported for what it is: the erase went through,
//! the program did not, and the cell now holds zero or garbage.
//!
//! # Locking
//!
//! Two locks are involved:
//!
//! - the bus lock, held for exactly one transfer and never across a settle
//!   delay;
//! - the EEPROM lock, held by an [`EepromAccess`] for a whole
//!   read-modify-write sequence.
//!
//! RAM reads only take the bus lock, so a sampling thread keeps running
//! while a configuration write waits out its settle delays.

use std::thread;
use std::time::Duration;

use embedded_hal::i2c::I2c;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::conversion::check_error_flag;
use crate::error::{BusOperation, Mlx90615Error, Result};
use crate::registers::{self, Register};

/// Register transport owning the bus connection.
pub struct RegisterTransport<I2C> {
    bus: Mutex<I2C>,
    address: u8,
    eeprom_settle: Duration,
    eeprom_lock: Mutex<()>,
}

impl<I2C: I2c> RegisterTransport<I2C> {
    /// Wrap a bus. `eeprom_settle` is waited after each EEPROM write phase.
    pub fn new(bus: I2C, address: u8, eeprom_settle: Duration) -> Self {
        Self {
            bus: Mutex::new(bus),
            address,
            eeprom_settle,
            eeprom_lock: Mutex::new(()),
        }
    }

    /// 7-bit device address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Read one register word.
    ///
    /// Callers reading EEPROM registers should go through [`Self::eeprom`]
    /// so the read is ordered against concurrent writes.
    pub fn read_word(&self, register: Register) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.bus
            .lock()
            .write_read(self.address, &[register.command()], &mut buf)
            .map_err(|e| Mlx90615Error::bus(BusOperation::Read, register.command(), e))?;

        let value = u16::from_le_bytes(buf);
        trace!(register = register.command(), value, "Read word");
        Ok(value)
    }

    /// Read a temperature register, rejecting words with the error flag set.
    pub fn read_channel(&self, register: Register) -> Result<u16> {
        check_error_flag(register, self.read_word(register)?)
    }

    /// Take the EEPROM lock for a read-modify-write sequence.
    pub fn eeprom(&self) -> EepromAccess<'_, I2C> {
        EepromAccess {
            transport: self,
            _guard: self.eeprom_lock.lock(),
        }
    }

    /// Put the device to sleep. It stops acknowledging until woken externally.
    pub fn sleep(&self) -> Result<()> {
        let frame = registers::sleep_frame(self.address);
        self.bus
            .lock()
            .write(self.address, &frame)
            .map_err(|e| Mlx90615Error::bus(BusOperation::Command, registers::OP_SLEEP, e))?;
        debug!(address = self.address, "Sent sleep command");
        Ok(())
    }

    /// Consume the transport and hand back the bus.
    pub fn release(self) -> I2C {
        self.bus.into_inner()
    }

    fn write_frame(&self, operation: BusOperation, register: Register, value: u16) -> Result<()> {
        let frame = registers::write_word_frame(self.address, register.command(), value);
        self.bus
            .lock()
            .write(self.address, &frame)
            .map_err(|e| Mlx90615Error::bus(operation, register.command(), e))
    }

    fn settle(&self) {
        if !self.eeprom_settle.is_zero() {
            thread::sleep(self.eeprom_settle);
        }
    }
}

/// Exclusive access to the EEPROM registers.
///
/// Holding this value holds the EEPROM lock; dropping it releases the lock.
/// It is the only way to write a register.
pub struct EepromAccess<'a, I2C> {
    transport: &'a RegisterTransport<I2C>,
    _guard: MutexGuard<'a, ()>,
}

impl<I2C: I2c> EepromAccess<'_, I2C> {
    /// Read a register word while holding the EEPROM lock.
    pub fn read_word(&self, register: Register) -> Result<u16> {
        self.transport.read_word(register)
    }

    /// Phase one: write the all-zero word, then wait for the cell to settle.
    pub fn erase_word(&self, register: Register) -> Result<()> {
        ensure_writable(register)?;
        self.transport.write_frame(BusOperation::Erase, register, 0x0000)?;
        self.transport.settle();
        Ok(())
    }

    /// Phase two: write the value into an erased cell, then wait for it to settle.
    ///
    /// The settle delay is honoured even when the transfer fails, since the
    /// device may already be busy with the write.
    pub fn program_word(&self, register: Register, value: u16) -> Result<()> {
        ensure_writable(register)?;
        let result = self.transport.write_frame(BusOperation::Program, register, value);
        self.transport.settle();
        result
    }

    /// Erase then program `register`.
    pub fn write_word(&self, register: Register, value: u16) -> Result<()> {
        debug!(register = register.command(), value, "Writing EEPROM word");
        self.erase_word(register)?;
        self.program_word(register, value)
    }
}

fn ensure_writable(register: Register) -> Result<()> {
    if register.is_volatile() {
        return Err(Mlx90615Error::invalid_argument(format!(
            "{} is a read-only RAM register",
            register
        )));
    }
    Ok(())
}
