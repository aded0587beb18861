#![cfg_attr(not(test), no_std)]

//! Driver for the SPI Engine, a programmable SPI controller built in FPGA fabric
//!
//! The core executes a small instruction set out of a command FIFO and moves
//! payload through two data FIFOs. This crate compiles transfer requests into
//! that instruction set and keeps the core fed.
//!
//! # Execution
//!
//! Each [`Message`] is compiled into a [`Program`]:
//! 1. **Configure**: `WRITE(CONFIG, mode)` and `WRITE(CLK_DIV, round(ref / sclk) - 1)`
//! 2. **Select** (optional): `ASSERT` pulls the device's chip-select low
//! 3. **Transfer**: `TRANSFER` clocks `max(tx, rx)` words, split into runs of 256
//! 4. **Delay** (optional): `SLEEP` for the requested time in SCLK periods
//! 5. **Release** (optional): `ASSERT` with every line high
//! 6. **Sync**: `SYNC(id)` with an 8-bit id that increments per program
//!
//! The issuing call pushes as much of the program and transmit payload as the
//! FIFOs have room for. The rest is pushed by [`SpiEngine::handle_interrupt`]
//! on FIFO-almost-empty interrupts, which also drains received words and
//! narrows the interrupt mask as sources run dry. The message has retired once
//! the core echoes the program's SYNC id.
//!
//! # Offload
//!
//! A program and its payload can instead be written into an offload slot's
//! memories ([`SpiEngine::offload_load_msg`]) and replayed by the core on an
//! external trigger once enabled ([`SpiEngine::offload_enable`]).
//!
//! # Register access
//!
//! The engine reaches the core only through [`RegisterIo`]; [`Mmio`] provides
//! volatile access at a fixed base address.

#[macro_use]
mod fmt;

mod device;
mod engine;
mod error;
pub mod instruction;
mod message;
mod offload;
pub mod program;
pub mod regs;

pub use device::{DeviceConfig, EngineDevice};
pub use engine::{IrqLine, Progress, ServiceMode, SpiEngine, SpiEngineConfig, Ticket, TransferState, TX_PAD};
pub use error::Error;
pub use instruction::Instruction;
pub use message::{Message, NUM_CHIP_SELECTS};
pub use offload::{Offload, MAX_OFFLOAD_SLOTS};
pub use program::Program;
pub use regs::{Mmio, RegisterIo, Version};
