//! Instruction compiler: turns a [`Message`] into the instruction stream the
//! core executes.
//!
//! Compilation writes into an [`InstructionSink`]. A [`Program`] stores the
//! instructions in a fixed-capacity buffer; an [`InstructionCounter`] runs the
//! same control flow without storing anything, which sizes a program before
//! committing any hardware resources to it.

use core::cmp::min;

use heapless::Vec;

use crate::error::Error;
use crate::instruction::{Instruction, Register, CS_NONE};
use crate::message::{Message, NUM_CHIP_SELECTS};

/// Capacity of a [`Program`] in instructions.
pub const MAX_PROGRAM_LEN: usize = 64;

/// Longest run a single `TRANSFER` or `SLEEP` can encode.
pub const MAX_RUN: usize = 256;

/// SCLK periods idled at the end of an offload program before its SYNC.
pub const OFFLOAD_SETTLE_SLEEP: u8 = 15;

const NSEC_PER_SEC: u64 = 1_000_000_000;

pub trait InstructionSink {
    fn emit(&mut self, insn: Instruction) -> Result<(), Error>;
}

/// Sink that only counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstructionCounter {
    count: usize,
}

impl InstructionCounter {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl InstructionSink for InstructionCounter {
    fn emit(&mut self, _insn: Instruction) -> Result<(), Error> {
        self.count += 1;
        Ok(())
    }
}

/// A compiled instruction stream, ending in a `SYNC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction, MAX_PROGRAM_LEN>,
}

impl InstructionSink for Program {
    fn emit(&mut self, insn: Instruction) -> Result<(), Error> {
        self.instructions.push(insn).map_err(|_| Error::ProgramTooLong)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub const fn new() -> Self {
        Self { instructions: Vec::new() }
    }

    /// Compile `msg` for interactive execution, closing with `SYNC(sync_id)`.
    pub fn compile(msg: &Message<'_>, ref_clk_hz: u32, sync_id: u8) -> Result<Self, Error> {
        let mut program = Self::new();
        emit_message(msg, ref_clk_hz, &mut program)?;
        program.emit(Instruction::Sync { id: sync_id })?;
        Ok(program)
    }

    /// Compile `msg` for offload replay: the body is followed by a settling
    /// `SLEEP` and `SYNC(0)`.
    pub fn compile_offload(msg: &Message<'_>, ref_clk_hz: u32) -> Result<Self, Error> {
        let mut program = Self::new();
        emit_message(msg, ref_clk_hz, &mut program)?;
        program.emit(Instruction::Sleep { periods_minus_one: OFFLOAD_SETTLE_SLEEP })?;
        program.emit(Instruction::Sync { id: 0 })?;
        Ok(program)
    }

    /// Number of instructions [`compile`](Self::compile) produces for `msg`.
    pub fn dry_run(msg: &Message<'_>, ref_clk_hz: u32) -> Result<usize, Error> {
        let mut counter = InstructionCounter::default();
        emit_message(msg, ref_clk_hz, &mut counter)?;
        counter.emit(Instruction::Sync { id: 0 })?;
        Ok(counter.count())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Encoded words in execution order.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.instructions.iter().map(|&insn| u32::from(insn))
    }
}

/// `round(ref / clk) - 1`, the value of the `CLK_DIV` register.
pub fn clock_divider(ref_clk_hz: u32, speed_hz: u32) -> Result<u8, Error> {
    if speed_hz == 0 || speed_hz > ref_clk_hz {
        return Err(Error::InvalidClock);
    }
    let ratio = (ref_clk_hz as u64 + speed_hz as u64 / 2) / speed_hz as u64;
    let div = ratio.saturating_sub(1);
    if div > u8::MAX as u64 {
        warn!("clock divider {=u64} clamped to 255", div);
        return Ok(u8::MAX);
    }
    Ok(div as u8)
}

/// SCLK periods covering `delay_ns` at the rate selected by `div`, rounded up.
pub fn sleep_periods(delay_ns: u32, ref_clk_hz: u32, div: u8) -> usize {
    let sclk_hz = ref_clk_hz as u64 / (div as u64 + 1);
    let periods = (delay_ns as u64 * sclk_hz).div_ceil(NSEC_PER_SEC);
    periods as usize
}

fn emit_message<S: InstructionSink>(msg: &Message<'_>, ref_clk_hz: u32, sink: &mut S) -> Result<(), Error> {
    if msg.chip_select >= NUM_CHIP_SELECTS {
        return Err(Error::InvalidChipSelect);
    }
    let div = clock_divider(ref_clk_hz, msg.speed_hz)?;

    sink.emit(Instruction::Write { register: Register::Config, value: msg.config_word() })?;
    sink.emit(Instruction::Write { register: Register::ClkDiv, value: div })?;

    if msg.assert_cs {
        sink.emit(Instruction::Assert { hold: 1, mask: msg.select_mask() })?;
    }

    let tx = !msg.tx.is_empty();
    let rx = msg.rx_len > 0;
    let mut remaining = msg.len();
    while remaining > 0 {
        let n = min(remaining, MAX_RUN);
        sink.emit(Instruction::Transfer { tx, rx, len_minus_one: (n - 1) as u8 })?;
        remaining -= n;
    }

    let mut periods = sleep_periods(msg.delay_ns, ref_clk_hz, div);
    while periods > 0 {
        let n = min(periods, MAX_RUN);
        sink.emit(Instruction::Sleep { periods_minus_one: (n - 1) as u8 })?;
        periods -= n;
    }

    if msg.release_cs {
        sink.emit(Instruction::Assert { hold: 1, mask: CS_NONE })?;
    }
    Ok(())
}
