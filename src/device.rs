//! `embedded-hal` front end for chip drivers.
//!
//! An [`EngineDevice`] binds the engine to one chip-select. Each operation of
//! a transaction becomes one message; the first asserts the chip-select and
//! the last releases it, so the whole transaction is framed once.

use embassy_embedded_hal::SetConfig;
use embedded_hal::spi::{ErrorType, Mode, Operation, SpiDevice};

use crate::engine::SpiEngine;
use crate::error::Error;
use crate::message::{Message, NUM_CHIP_SELECTS};
use crate::program::clock_divider;
use crate::regs::RegisterIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub speed_hz: u32,
    pub mode: Mode,
    pub three_wire: bool,
}

pub struct EngineDevice<'e, R, const N: usize> {
    engine: &'e SpiEngine<R, N>,
    chip_select: u8,
    config: DeviceConfig,
}

impl<R: RegisterIo, const N: usize> SpiEngine<R, N> {
    /// A device on `chip_select` using the engine's default rate and mode.
    pub fn device(&self, chip_select: u8) -> Result<EngineDevice<'_, R, N>, Error> {
        if chip_select >= NUM_CHIP_SELECTS {
            return Err(Error::InvalidChipSelect);
        }
        Ok(EngineDevice {
            engine: self,
            chip_select,
            config: DeviceConfig {
                speed_hz: self.config.max_speed_hz,
                mode: self.config.mode,
                three_wire: false,
            },
        })
    }
}

impl<R: RegisterIo, const N: usize> EngineDevice<'_, R, N> {
    pub fn chip_select(&self) -> u8 {
        self.chip_select
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn message<'a>(&self) -> Message<'a> {
        Message::new(self.chip_select, self.config.speed_hz)
            .with_mode(self.config.mode)
            .with_three_wire(self.config.three_wire)
    }

    fn run(&self, op: &mut Operation<'_, u8>, first: bool, last: bool) -> Result<(), Error> {
        let engine = self.engine;
        let msg = self.message().with_assert_cs(first).with_release_cs(last);
        match op {
            Operation::Read(buf) => {
                engine.transfer_one_message(&msg.with_rx_len(buf.len()), buf)?;
            }
            Operation::Write(buf) => {
                engine.transfer_one_message(&msg.with_tx(buf), &mut [])?;
            }
            Operation::Transfer(read, write) => {
                engine.transfer_one_message(&msg.with_tx(write).with_rx_len(read.len()), read)?;
            }
            Operation::TransferInPlace(buf) => {
                let ticket = engine.start(&msg.with_tx(&buf[..]).with_rx_len(buf.len()))?;
                engine.wait(ticket)?;
                engine.finish(ticket, buf)?;
            }
            Operation::DelayNs(ns) => {
                engine.transfer_one_message(&msg.with_delay_ns(*ns), &mut [])?;
            }
        }
        Ok(())
    }
}

impl<R: RegisterIo, const N: usize> ErrorType for EngineDevice<'_, R, N> {
    type Error = Error;
}

impl<R: RegisterIo, const N: usize> SpiDevice<u8> for EngineDevice<'_, R, N> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
        let last = match operations.len() {
            0 => return Ok(()),
            n => n - 1,
        };
        for (i, op) in operations.iter_mut().enumerate() {
            if let Err(err) = self.run(op, i == 0, i == last) {
                if i > 0 {
                    // leave no device selected behind a failed transaction
                    let release = self.message().with_release_cs(true);
                    let _ = self.engine.transfer_one_message(&release, &mut []);
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl<R: RegisterIo, const N: usize> SetConfig for EngineDevice<'_, R, N> {
    type Config = DeviceConfig;
    type ConfigError = Error;

    fn set_config(&mut self, config: &DeviceConfig) -> Result<(), Error> {
        clock_divider(self.engine.config.ref_clk_hz, config.speed_hz)?;
        self.config = *config;
        Ok(())
    }
}
