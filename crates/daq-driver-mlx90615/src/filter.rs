//! IIR filter setting, stored in bits 12-14 of the configuration register.
//!
//! The rest of the configuration word is device-owned (PWM/SMBus mode,
//! factory trim), so updates read the current word and only touch the filter
//! field.

use embedded_hal::i2c::I2c;
use tracing::info;

use crate::conversion::validate_filter_index;
use crate::error::{Mlx90615Error, Result};
use crate::registers::{ConfigRegister, Register};
use crate::transport::RegisterTransport;

/// Read the current filter index (1-7).
///
/// A device holding the forbidden value 0 is reported as a hardware fault.
pub fn filter_index<I2C: I2c>(transport: &RegisterTransport<I2C>) -> Result<u8> {
    let raw = transport.eeprom().read_word(Register::Config)?;
    match ConfigRegister(raw).iir_index() {
        0 => Err(Mlx90615Error::HardwareFault {
            register: Register::Config,
            raw,
        }),
        index => Ok(index),
    }
}

/// Set the filter index, preserving every other configuration bit.
///
/// Returns the configuration word that was written. The index is validated
/// before the bus is touched.
pub fn set_filter_index<I2C: I2c>(transport: &RegisterTransport<I2C>, index: u8) -> Result<u16> {
    let index = validate_filter_index(index)?;

    let eeprom = transport.eeprom();
    let current = ConfigRegister(eeprom.read_word(Register::Config)?);
    let updated = current.with_iir_index(index);
    eeprom.write_word(Register::Config, updated.bits())?;

    info!(
        previous = current.iir_index(),
        index,
        config = updated.bits(),
        "Updated IIR filter"
    );
    Ok(updated.bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimulatedMlx90615;
    use std::time::Duration;

    #[test]
    fn test_update_preserves_other_bits() {
        let sim = SimulatedMlx90615::new();
        sim.set_register(Register::Config, 0x8442);
        let transport = RegisterTransport::new(sim.clone(), 0x5B, Duration::ZERO);

        assert_eq!(set_filter_index(&transport, 7).unwrap(), 0xF442);
        assert_eq!(filter_index(&transport).unwrap(), 7);
        assert_eq!(sim.register(Register::Config), 0xF442);
    }

    #[test]
    fn test_reserved_index_rejected_before_bus() {
        let sim = SimulatedMlx90615::new();
        let transport = RegisterTransport::new(sim.clone(), 0x5B, Duration::ZERO);

        assert!(set_filter_index(&transport, 0).unwrap_err().is_invalid_argument());
        assert!(sim.events().is_empty());
    }

    #[test]
    fn test_reserved_field_on_device() {
        let sim = SimulatedMlx90615::new();
        sim.set_register(Register::Config, 0x0442);
        let transport = RegisterTransport::new(sim, 0x5B, Duration::ZERO);

        assert_eq!(
            filter_index(&transport),
            Err(Mlx90615Error::HardwareFault {
                register: Register::Config,
                raw: 0x0442
            })
        );
    }
}
