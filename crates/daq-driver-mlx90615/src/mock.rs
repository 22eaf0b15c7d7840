//! Simulated MLX90615 for tests and demos.
//!
//! [`SimulatedMlx90615`] implements [`embedded_hal::i2c::I2c`] and behaves like
//! the device on the wire:
//!
//! - writes without a valid PEC are acknowledged but ignored;
//! - RAM registers ignore writes;
//! - EEPROM programming can only set bits, so a cell must be erased (written
//!   with `0x0000`) before it takes a new value;
//! - while an EEPROM write cycle is in progress the device does not
//!   acknowledge;
//! - after the sleep command the device stops acknowledging until
//!   [`SimulatedMlx90615::wake`].
//!
//! The handle is cheap to clone. Give one clone to the driver and keep another
//! to inspect registers, inject faults and read the [`BusEvent`] log.
//!
//! # Example
//!
//! ```rust
//! use daq_driver_mlx90615::mock::{ErrorScenario, SimulatedMlx90615};
//! use daq_driver_mlx90615::registers::Register;
//!
//! let sim = SimulatedMlx90615::new();
//! sim.set_register(Register::Object, 15_158);
//! sim.inject(ErrorScenario::ErrorFlag { register: Register::Ambient });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};
use parking_lot::Mutex;

use crate::registers::{self, Register, DEFAULT_ADDRESS, ERROR_FLAG, OP_SLEEP};

/// Configuration word at power-up: filter index 1, SMBus mode.
pub const DEFAULT_CONFIG: u16 = 0x1442;
/// Emissivity word at power-up (1.0).
pub const DEFAULT_EMISSIVITY: u16 = 0x4000;
/// Ambient word at power-up (25.01 °C).
pub const DEFAULT_AMBIENT: u16 = 14_908;
/// Object word at power-up (31.01 °C).
pub const DEFAULT_OBJECT: u16 = 15_158;
/// Raw IR word at power-up.
pub const DEFAULT_RAW_IR: u16 = 0x0123;

/// Injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScenario {
    /// Acknowledge `count` transactions, then fail every one after
    FailAfterN { count: u32 },
    /// Fail every transaction addressing `register`
    FailOnRegister { register: Register },
    /// Stop acknowledging entirely
    CommunicationLoss,
    /// Report every read of `register` with the error flag set
    ErrorFlag { register: Register },
}

/// One transaction as seen by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Word read
    Read { command: u8, value: u16 },
    /// Accepted word write; `stored` is the resulting cell content
    Write { command: u8, value: u16, stored: u16 },
    /// Write acknowledged but discarded (bad PEC or read-only register)
    Ignored { command: u8, value: u16 },
    /// Sleep command accepted
    Sleep,
    /// Transaction not acknowledged
    Nack { command: Option<u8> },
}

struct SimState {
    address: u8,
    registers: HashMap<u8, u16>,
    scenarios: Vec<ErrorScenario>,
    transactions: u32,
    asleep: bool,
    write_cycle: Duration,
    busy_until: Option<Instant>,
    events: VecDeque<BusEvent>,
}

/// Number of [`BusEvent`]s kept; older events are discarded first.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Cloneable handle to a simulated device.
#[derive(Clone)]
pub struct SimulatedMlx90615 {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedMlx90615 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMlx90615 {
    /// Device at the default address with power-up register contents.
    pub fn new() -> Self {
        Self::with_address(DEFAULT_ADDRESS)
    }

    /// Device answering at `address`.
    pub fn with_address(address: u8) -> Self {
        let registers = HashMap::from([
            (Register::Config.command(), DEFAULT_CONFIG),
            (Register::Emissivity.command(), DEFAULT_EMISSIVITY),
            (Register::Ambient.command(), DEFAULT_AMBIENT),
            (Register::Object.command(), DEFAULT_OBJECT),
            (Register::RawIr.command(), DEFAULT_RAW_IR),
        ]);
        Self {
            state: Arc::new(Mutex::new(SimState {
                address,
                registers,
                scenarios: Vec::new(),
                transactions: 0,
                asleep: false,
                write_cycle: Duration::ZERO,
                busy_until: None,
                events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            })),
        }
    }

    /// Refuse transactions for `cycle` after each EEPROM write.
    pub fn with_write_cycle(self, cycle: Duration) -> Self {
        self.state.lock().write_cycle = cycle;
        self
    }

    /// Overwrite a register directly, bypassing the bus.
    pub fn set_register(&self, register: Register, value: u16) {
        self.state.lock().registers.insert(register.command(), value);
    }

    /// Current content of a register.
    pub fn register(&self, register: Register) -> u16 {
        self.state
            .lock()
            .registers
            .get(&register.command())
            .copied()
            .unwrap_or_default()
    }

    /// Add a failure scenario. The transaction counter restarts.
    pub fn inject(&self, scenario: ErrorScenario) {
        let mut state = self.state.lock();
        state.transactions = 0;
        state.scenarios.push(scenario);
    }

    /// Remove every failure scenario.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.scenarios.clear();
        state.transactions = 0;
    }

    /// Check if the device is in sleep mode.
    pub fn is_asleep(&self) -> bool {
        self.state.lock().asleep
    }

    /// Leave sleep mode (on hardware: pull SCL low for the wake-up time).
    pub fn wake(&self) {
        self.state.lock().asleep = false;
    }

    /// The most recent [`EVENT_LOG_CAPACITY`] transactions, oldest first.
    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Accepted writes so far, as `(command, value)` pairs.
    pub fn writes(&self) -> Vec<(u8, u16)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Write { command, value, .. } => Some((command, value)),
                _ => None,
            })
            .collect()
    }

    /// Forget the event log.
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }
}

impl SimState {
    fn record(&mut self, event: BusEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn nack(&mut self, command: Option<u8>, source: NoAcknowledgeSource) -> ErrorKind {
        self.record(BusEvent::Nack { command });
        ErrorKind::NoAcknowledge(source)
    }

    /// Scenario checks that apply before the payload is interpreted.
    fn check_faults(&mut self, command: Option<u8>) -> Result<(), ErrorKind> {
        self.transactions = self.transactions.saturating_add(1);
        let transactions = self.transactions;

        for scenario in self.scenarios.clone() {
            match scenario {
                ErrorScenario::CommunicationLoss => {
                    return Err(self.nack(command, NoAcknowledgeSource::Address));
                }
                ErrorScenario::FailAfterN { count } if transactions > count => {
                    self.record(BusEvent::Nack { command });
                    return Err(ErrorKind::Bus);
                }
                ErrorScenario::FailOnRegister { register } if command == Some(register.command()) => {
                    return Err(self.nack(command, NoAcknowledgeSource::Data));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn flagged(&self, command: u8) -> bool {
        self.scenarios.iter().any(|scenario| {
            matches!(scenario, ErrorScenario::ErrorFlag { register } if register.command() == command)
        })
    }

    fn read_word(&mut self, command: u8, buf: &mut [u8]) {
        let mut value = self.registers.get(&command).copied().unwrap_or_default();
        if self.flagged(command) {
            value |= ERROR_FLAG;
        }
        for (dst, src) in buf.iter_mut().zip(value.to_le_bytes()) {
            *dst = src;
        }
        self.record(BusEvent::Read { command, value });
    }

    fn write_word(&mut self, frame: &[u8]) {
        let [command, low, high, crc] = [frame[0], frame[1], frame[2], frame[3]];
        let value = u16::from_le_bytes([low, high]);

        let valid_pec = registers::pec(&[self.address << 1, command, low, high]) == crc;
        let writable = Register::from_command(command).map_or(true, |r| !r.is_volatile());
        if !valid_pec || !writable {
            self.record(BusEvent::Ignored { command, value });
            return;
        }

        let cell = self.registers.entry(command).or_default();
        *cell = if value == 0 { 0 } else { *cell | value };
        let stored = *cell;
        self.record(BusEvent::Write {
            command,
            value,
            stored,
        });
        if !self.write_cycle.is_zero() {
            self.busy_until = Some(Instant::now() + self.write_cycle);
        }
    }

    fn sleep(&mut self, frame: &[u8]) {
        if registers::pec(&[self.address << 1, OP_SLEEP]) == frame[1] {
            self.asleep = true;
            self.record(BusEvent::Sleep);
        } else {
            self.record(BusEvent::Ignored {
                command: OP_SLEEP,
                value: 0,
            });
        }
    }
}

impl ErrorType for SimulatedMlx90615 {
    type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for SimulatedMlx90615 {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.lock();

        let command = match operations.first() {
            Some(Operation::Write(bytes)) => bytes.first().copied(),
            _ => None,
        };

        if address != state.address || state.asleep {
            return Err(state.nack(command, NoAcknowledgeSource::Address));
        }
        if let Some(until) = state.busy_until {
            if Instant::now() < until {
                return Err(state.nack(command, NoAcknowledgeSource::Address));
            }
            state.busy_until = None;
        }
        state.check_faults(command)?;

        match operations {
            [Operation::Write(cmd), Operation::Read(buf)] if cmd.len() == 1 => {
                state.read_word(cmd[0], buf);
                Ok(())
            }
            [Operation::Write(frame)] if frame.len() == 4 => {
                state.write_word(frame);
                Ok(())
            }
            [Operation::Write(frame)] if frame.len() == 2 && frame[0] == OP_SLEEP => {
                state.sleep(frame);
                Ok(())
            }
            _ => Err(state.nack(command, NoAcknowledgeSource::Data)),
        }
    }
}
