//! Register map of the SPI Engine core and the raw access seam.
//!
//! All registers are 32 bits wide. Offsets are relative to the base address
//! of the AXI slave that the core occupies in the fabric address map.

use core::ptr;

/// Core version, `major.minor.patch` packed as `0x00MMmmpp`
pub const VERSION: usize = 0x00;
/// Write 1 to hold the core in reset, 0 to release it
pub const RESET: usize = 0x40;
/// Interrupt enable mask, see [`irq`]
pub const INT_ENABLE: usize = 0x80;
/// Pending interrupts (source & enable), write-1-to-clear
pub const INT_PENDING: usize = 0x84;
/// Raw interrupt sources
pub const INT_SOURCE: usize = 0x88;
/// Identifier of the last retired SYNC instruction
pub const SYNC_ID: usize = 0xc0;
/// Free entries in the command FIFO
pub const CMD_FIFO_ROOM: usize = 0xd0;
/// Free entries in the SDO (transmit) FIFO
pub const SDO_FIFO_ROOM: usize = 0xd4;
/// Filled entries in the SDI (receive) FIFO
pub const SDI_FIFO_LEVEL: usize = 0xd8;
/// Command FIFO push port
pub const CMD_FIFO: usize = 0xe0;
/// SDO FIFO push port
pub const SDO_DATA_FIFO: usize = 0xe4;
/// SDI FIFO pop port
pub const SDI_DATA_FIFO: usize = 0xe8;

const OFFLOAD_STRIDE: usize = 0x20;

/// Offload control, bit 0 enables replay on the external trigger
pub const fn offload_ctrl(slot: usize) -> usize {
    0x100 + OFFLOAD_STRIDE * slot
}

/// Offload status
pub const fn offload_status(slot: usize) -> usize {
    0x104 + OFFLOAD_STRIDE * slot
}

/// Offload memory reset, write 1 then 0
pub const fn offload_reset(slot: usize) -> usize {
    0x108 + OFFLOAD_STRIDE * slot
}

/// Offload command memory push port
pub const fn offload_cmd_mem(slot: usize) -> usize {
    0x110 + OFFLOAD_STRIDE * slot
}

/// Offload SDO memory push port
pub const fn offload_sdo_mem(slot: usize) -> usize {
    0x114 + OFFLOAD_STRIDE * slot
}

pub mod irq {
    /// Command FIFO level at or below its threshold
    pub const CMD_ALMOST_EMPTY: u32 = 1 << 0;
    /// SDO FIFO level at or below its threshold
    pub const SDO_ALMOST_EMPTY: u32 = 1 << 1;
    /// SDI FIFO level at or above its threshold
    pub const SDI_ALMOST_FULL: u32 = 1 << 2;
    /// A SYNC instruction retired
    pub const SYNC: u32 = 1 << 3;

    pub const ALL: u32 = CMD_ALMOST_EMPTY | SDO_ALMOST_EMPTY | SDI_ALMOST_FULL | SYNC;
}

pub mod offload {
    /// OFFLOAD_CTRL: replay enabled
    pub const ENABLE: u32 = 1 << 0;
}

/// Only cores with this major version are supported.
pub const SUPPORTED_MAJOR: u8 = 1;

/// Decoded VERSION register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u8,
            minor: (raw >> 8) as u8,
            patch: raw as u8,
        }
    }
}

/// Raw 32-bit register access at `base + offset`.
///
/// The driver never touches the bus directly; everything goes through this
/// seam so the engine runs against MMIO on target and against a model of the
/// core on the host.
pub trait RegisterIo {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Volatile memory-mapped access to a core at a fixed base address
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of an SPI Engine register block that stays
    /// mapped for the lifetime of the returned value, and nothing else may
    /// drive that block concurrently.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl RegisterIo for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: `new` guarantees the block is mapped; offsets come from this module.
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&self, offset: usize, value: u32) {
        // SAFETY: see `read`.
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}
