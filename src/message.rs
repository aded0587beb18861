use core::cmp::max;

use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};

use crate::instruction::config;

/// Number of chip-select lines driven by the core.
pub const NUM_CHIP_SELECTS: u8 = 8;

/// One transfer request: a single full-duplex transfer on one chip-select.
///
/// Transmit and receive run over the same clock cycles, so the transfer
/// length is the larger of `tx.len()` and `rx_len`. A shorter transmit side is
/// padded with `0xff`; surplus received words are discarded.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub chip_select: u8,
    /// Pull the selected line low before the transfer.
    pub assert_cs: bool,
    /// Release every line after the transfer.
    pub release_cs: bool,
    pub speed_hz: u32,
    pub mode: Mode,
    pub three_wire: bool,
    pub tx: &'a [u8],
    pub rx_len: usize,
    /// Idle time after the transfer, before the chip-select is released.
    pub delay_ns: u32,
}

impl<'a> Message<'a> {
    pub const fn new(chip_select: u8, speed_hz: u32) -> Self {
        Self {
            chip_select,
            assert_cs: false,
            release_cs: false,
            speed_hz,
            mode: MODE_0,
            three_wire: false,
            tx: &[],
            rx_len: 0,
            delay_ns: 0,
        }
    }

    pub const fn with_tx(mut self, tx: &'a [u8]) -> Self {
        self.tx = tx;
        self
    }

    pub const fn with_rx_len(mut self, rx_len: usize) -> Self {
        self.rx_len = rx_len;
        self
    }

    /// Frame the transfer with chip-select assert and release.
    pub const fn with_cs_change(mut self, cs_change: bool) -> Self {
        self.assert_cs = cs_change;
        self.release_cs = cs_change;
        self
    }

    pub const fn with_assert_cs(mut self, assert_cs: bool) -> Self {
        self.assert_cs = assert_cs;
        self
    }

    pub const fn with_release_cs(mut self, release_cs: bool) -> Self {
        self.release_cs = release_cs;
        self
    }

    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn with_three_wire(mut self, three_wire: bool) -> Self {
        self.three_wire = three_wire;
        self
    }

    pub const fn with_delay_ns(mut self, delay_ns: u32) -> Self {
        self.delay_ns = delay_ns;
        self
    }

    /// Words clocked by the transfer.
    pub fn len(&self) -> usize {
        max(self.tx.len(), self.rx_len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cs_change(&self) -> bool {
        self.assert_cs || self.release_cs
    }

    /// Value of the core's `CONFIG` register for this message.
    pub fn config_word(&self) -> u8 {
        let mut word = 0;
        if self.mode.phase == Phase::CaptureOnSecondTransition {
            word |= config::CPHA;
        }
        if self.mode.polarity == Polarity::IdleHigh {
            word |= config::CPOL;
        }
        if self.three_wire {
            word |= config::THREE_WIRE;
        }
        word
    }

    /// Line pattern that selects only this message's device.
    pub fn select_mask(&self) -> u8 {
        !1u8.checked_shl(self.chip_select as u32).unwrap_or(0)
    }
}
