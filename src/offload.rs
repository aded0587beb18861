//! Offload mode: a compiled program and its transmit payload are written into
//! per-slot memories inside the core and replayed on an external trigger with
//! no CPU involvement. Words received during replay leave the core on its
//! offload stream interface and never reach this driver.

use core::cmp::min;
use core::iter::repeat;

use crate::engine::{SpiEngine, TX_PAD};
use crate::error::Error;
use crate::message::Message;
use crate::program::Program;
use crate::regs::{self, RegisterIo};

/// Slots addressable by the engine's control block.
pub const MAX_OFFLOAD_SLOTS: u8 = 8;

/// One offload slot of an engine
pub struct Offload<'e, R, const N: usize> {
    engine: &'e SpiEngine<R, N>,
    slot: usize,
}

impl<R: RegisterIo, const N: usize> SpiEngine<R, N> {
    pub fn offload(&self, slot: usize) -> Result<Offload<'_, R, N>, Error> {
        if slot >= min(self.config.offload_slots, MAX_OFFLOAD_SLOTS) as usize {
            return Err(Error::InvalidOffloadSlot);
        }
        Ok(Offload { engine: self, slot })
    }

    /// Load `msg` into offload slot 0.
    pub fn offload_load_msg(&self, msg: &Message<'_>) -> Result<(), Error> {
        self.offload(0)?.load_msg(msg)
    }

    /// Start or stop replay of offload slot 0.
    pub fn offload_enable(&self, enable: bool) -> Result<(), Error> {
        self.offload(0)?.enable(enable)
    }
}

impl<R: RegisterIo, const N: usize> Offload<'_, R, N> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    fn bit(&self) -> u8 {
        1 << self.slot
    }

    /// Replace the slot's program and payload with `msg`.
    ///
    /// The slot must be disabled. Nothing in the core is touched unless the
    /// program and payload fit the slot's memories.
    pub fn load_msg(&self, msg: &Message<'_>) -> Result<(), Error> {
        let engine = self.engine;
        engine.inner.lock(|inner| {
            let inner = inner.borrow();
            if !inner.ready {
                return Err(Error::NotInitialized);
            }
            if inner.offload_enabled & self.bit() != 0 {
                return Err(Error::OffloadEnabled);
            }

            let program = Program::compile_offload(msg, engine.config.ref_clk_hz)?;
            let tx_len = if msg.tx.is_empty() { 0 } else { msg.len() };
            if program.len() > engine.config.offload_cmd_mem_depth || tx_len > engine.config.offload_sdo_mem_depth {
                return Err(Error::OffloadTooLarge);
            }

            let io = &engine.regs;
            io.write(regs::offload_reset(self.slot), 1);
            io.write(regs::offload_reset(self.slot), 0);
            for word in msg.tx.iter().copied().chain(repeat(TX_PAD)).take(tx_len) {
                io.write(regs::offload_sdo_mem(self.slot), word as u32);
            }
            for word in program.words() {
                io.write(regs::offload_cmd_mem(self.slot), word);
            }
            debug!(
                "spi engine: offload {=usize} loaded, {=usize} instructions, {=usize} words",
                self.slot,
                program.len(),
                tx_len
            );
            Ok(())
        })
    }

    /// Arm or disarm replay. Arming is refused while an interactive message
    /// is in flight.
    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        let engine = self.engine;
        engine.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !inner.ready {
                return Err(Error::NotInitialized);
            }
            if enable && inner.in_flight() {
                return Err(Error::Busy);
            }
            let ctrl = if enable { regs::offload::ENABLE } else { 0 };
            engine.regs.write(regs::offload_ctrl(self.slot), ctrl);
            if enable {
                inner.offload_enabled |= self.bit();
            } else {
                inner.offload_enabled &= !self.bit();
            }
            debug!("spi engine: offload {=usize} enable={=bool}", self.slot, enable);
            Ok(())
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.inner.lock(|inner| inner.borrow().offload_enabled & self.bit() != 0)
    }

    /// Raw OFFLOAD_STATUS register.
    pub fn status(&self) -> u32 {
        self.engine.regs.read(regs::offload_status(self.slot))
    }
}
