//! Register-level model of the SPI Engine core.
//!
//! The model executes instructions whenever a register is read, as far as the
//! FIFOs allow, so the hardware always looks fast next to the driver. FIFO
//! depths are small and configurable to force the driver through its
//! interrupt continuation paths.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use spi_engine::instruction::{Instruction, Register};
use spi_engine::regs::{self, irq, RegisterIo};
use spi_engine::{SpiEngine, SpiEngineConfig};

pub const VERSION_1_3_0: u32 = 0x0001_0300;
pub const REF_CLK: u32 = 100_000_000;

#[derive(Debug, Default, Clone)]
pub struct Slot {
    pub ctrl: u32,
    pub resets: usize,
    pub cmd_mem: Vec<u16>,
    pub sdo_mem: Vec<u8>,
}

pub struct Hw {
    pub version: u32,
    pub cmd_depth: usize,
    pub sdo_depth: usize,
    pub sdi_depth: usize,
    pub cmd: VecDeque<u16>,
    pub sdo: VecDeque<u8>,
    pub sdi: VecDeque<u8>,
    pub int_enable: u32,
    pub sync_latched: bool,
    pub sync_id: u32,
    /// Stop executing instructions, as a wedged core would
    pub stalled: bool,
    pub in_reset: bool,
    pub resets: usize,
    pub config: u8,
    pub clk_div: u8,
    pub cs: u8,
    /// Every chip-select pattern applied, in order
    pub cs_history: Vec<u8>,
    /// Chip-select pattern at the start of each executed TRANSFER
    pub cs_at_transfer: Vec<u8>,
    pub executed: Vec<Instruction>,
    pub mosi: Vec<u8>,
    pub overflow: bool,
    pub underflow: bool,
    pub writes: usize,
    pub responder: Box<dyn FnMut(u8) -> u8>,
    pub slots: Vec<Slot>,
    xfer_left: Option<usize>,
}

impl Hw {
    fn source(&self) -> u32 {
        let mut source = 0;
        if self.cmd.len() <= self.cmd_depth / 2 {
            source |= irq::CMD_ALMOST_EMPTY;
        }
        if self.sdo.len() <= self.sdo_depth / 2 {
            source |= irq::SDO_ALMOST_EMPTY;
        }
        if self.sdi.len() >= (self.sdi_depth / 2).max(1) {
            source |= irq::SDI_ALMOST_FULL;
        }
        if self.sync_latched {
            source |= irq::SYNC;
        }
        source
    }

    fn reset(&mut self) {
        self.cmd.clear();
        self.sdo.clear();
        self.sdi.clear();
        self.xfer_left = None;
        self.sync_latched = false;
        self.sync_id = 0;
        self.cs = 0xff;
        self.resets += 1;
    }

    fn step(&mut self) {
        if self.stalled || self.in_reset {
            return;
        }
        while let Some(&word) = self.cmd.front() {
            let insn = Instruction::decode(word).expect("core received an invalid instruction");
            match insn {
                Instruction::Write { register: Register::Config, value } => self.config = value,
                Instruction::Write { register: Register::ClkDiv, value } => self.clk_div = value,
                Instruction::Assert { mask, .. } => {
                    self.cs = mask;
                    self.cs_history.push(mask);
                }
                Instruction::Transfer { tx, rx, len_minus_one } => {
                    if self.xfer_left.is_none() {
                        self.cs_at_transfer.push(self.cs);
                    }
                    let left = self.xfer_left.get_or_insert(len_minus_one as usize + 1);
                    while *left > 0 {
                        if tx && self.sdo.is_empty() {
                            return;
                        }
                        if rx && self.sdi.len() >= self.sdi_depth {
                            return;
                        }
                        let out = if tx { self.sdo.pop_front().unwrap_or(0) } else { 0 };
                        if tx {
                            self.mosi.push(out);
                        }
                        if rx {
                            let word = (self.responder)(out);
                            self.sdi.push_back(word);
                        }
                        *left -= 1;
                    }
                    self.xfer_left = None;
                }
                Instruction::Sync { id } => {
                    self.sync_id = id as u32;
                    self.sync_latched = true;
                }
                Instruction::Sleep { .. } => {}
            }
            self.executed.push(insn);
            self.cmd.pop_front();
        }
    }

    fn slot_reg(&self, offset: usize) -> Option<(usize, usize)> {
        let base = regs::offload_ctrl(0);
        let end = regs::offload_ctrl(self.slots.len());
        if (base..end).contains(&offset) {
            Some(((offset - base) / 0x20, (offset - base) % 0x20))
        } else {
            None
        }
    }

    pub fn executed_transfers(&self) -> usize {
        self.executed.iter().filter(|i| matches!(i, Instruction::Transfer { .. })).count()
    }
}

pub struct FakeEngine {
    pub hw: RefCell<Hw>,
}

impl FakeEngine {
    pub fn new(cmd_depth: usize, sdo_depth: usize, sdi_depth: usize) -> Self {
        Self {
            hw: RefCell::new(Hw {
                version: VERSION_1_3_0,
                cmd_depth,
                sdo_depth,
                sdi_depth,
                cmd: VecDeque::new(),
                sdo: VecDeque::new(),
                sdi: VecDeque::new(),
                int_enable: 0,
                sync_latched: false,
                sync_id: 0,
                stalled: false,
                in_reset: false,
                resets: 0,
                config: 0,
                clk_div: 0,
                cs: 0xff,
                cs_history: Vec::new(),
                cs_at_transfer: Vec::new(),
                executed: Vec::new(),
                mosi: Vec::new(),
                overflow: false,
                underflow: false,
                writes: 0,
                responder: Box::new(|b| b ^ 0xff),
                slots: vec![Slot::default(); 2],
                xfer_left: None,
            }),
        }
    }

    /// Roomy FIFOs, most messages fit in the first burst.
    pub fn roomy() -> Self {
        Self::new(64, 64, 64)
    }

    /// Tiny FIFOs, every message needs the interrupt path.
    pub fn cramped() -> Self {
        Self::new(2, 2, 2)
    }

    pub fn with_responder(self, responder: impl FnMut(u8) -> u8 + 'static) -> Self {
        self.hw.borrow_mut().responder = Box::new(responder);
        self
    }
}

impl RegisterIo for FakeEngine {
    fn read(&self, offset: usize) -> u32 {
        let mut hw = self.hw.borrow_mut();
        hw.step();
        match offset {
            regs::VERSION => hw.version,
            regs::INT_ENABLE => hw.int_enable,
            regs::INT_PENDING => hw.source() & hw.int_enable,
            regs::INT_SOURCE => hw.source(),
            regs::SYNC_ID => hw.sync_id,
            regs::CMD_FIFO_ROOM => (hw.cmd_depth - hw.cmd.len()) as u32,
            regs::SDO_FIFO_ROOM => (hw.sdo_depth - hw.sdo.len()) as u32,
            regs::SDI_FIFO_LEVEL => hw.sdi.len() as u32,
            regs::SDI_DATA_FIFO => match hw.sdi.pop_front() {
                Some(word) => word as u32,
                None => {
                    hw.underflow = true;
                    0
                }
            },
            offset => match hw.slot_reg(offset) {
                Some((slot, 0x0)) => hw.slots[slot].ctrl,
                _ => 0,
            },
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut hw = self.hw.borrow_mut();
        hw.writes += 1;
        match offset {
            regs::RESET => {
                if value & 1 != 0 {
                    hw.reset();
                }
                hw.in_reset = value & 1 != 0;
            }
            regs::INT_ENABLE => hw.int_enable = value,
            regs::INT_PENDING => {
                if value & irq::SYNC != 0 {
                    hw.sync_latched = false;
                }
            }
            regs::CMD_FIFO => {
                if hw.cmd.len() >= hw.cmd_depth {
                    hw.overflow = true;
                } else {
                    hw.cmd.push_back(value as u16);
                }
            }
            regs::SDO_DATA_FIFO => {
                if hw.sdo.len() >= hw.sdo_depth {
                    hw.overflow = true;
                } else {
                    hw.sdo.push_back(value as u8);
                }
            }
            offset => match hw.slot_reg(offset) {
                Some((slot, 0x0)) => hw.slots[slot].ctrl = value,
                Some((slot, 0x8)) => {
                    if value & 1 != 0 {
                        let slot = &mut hw.slots[slot];
                        slot.cmd_mem.clear();
                        slot.sdo_mem.clear();
                        slot.resets += 1;
                    }
                }
                Some((slot, 0x10)) => hw.slots[slot].cmd_mem.push(value as u16),
                Some((slot, 0x14)) => hw.slots[slot].sdo_mem.push(value as u8),
                _ => {}
            },
        }
    }
}

pub fn config() -> SpiEngineConfig {
    SpiEngineConfig {
        max_speed_hz: 10_000_000,
        poll_limit: 10_000,
        offload_slots: 2,
        ..SpiEngineConfig::new(REF_CLK)
    }
}

/// Engine over `fake`, set up and ready.
pub fn engine(fake: &FakeEngine, config: SpiEngineConfig) -> SpiEngine<&FakeEngine, 64> {
    let engine = SpiEngine::new(fake, config);
    engine.setup().expect("setup");
    engine
}
