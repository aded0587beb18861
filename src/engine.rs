//! Interactive execution: FIFO feeder, interrupt service, completion tracking.
//!
//! A message is compiled into a [`Program`] and pushed into the core as far as
//! the FIFOs have room. Whatever does not fit is delivered from
//! [`SpiEngine::handle_interrupt`] as the FIFOs drain. Each program ends in a
//! `SYNC` carrying an 8-bit id; once the core echoes that id back the message
//! has retired and its received words can be collected.
//!
//! All state shared between the issuing context and the interrupt handler sits
//! behind a critical-section mutex, so the initial FIFO burst and an interrupt
//! pass never interleave.

use core::cell::RefCell;
use core::cmp::min;
use core::hint::spin_loop;
use core::iter::repeat;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use embedded_hal::spi::{Mode, MODE_0};
use heapless::Vec;

use crate::error::Error;
use crate::message::Message;
use crate::program::Program;
use crate::regs::{self, irq, RegisterIo, Version, SUPPORTED_MAJOR};

/// Fill value clocked out when the transmit side is shorter than the transfer.
pub const TX_PAD: u8 = 0xff;

/// How the core's interrupt sources get serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceMode {
    /// The platform calls [`SpiEngine::handle_interrupt`] from the engine's IRQ.
    Interrupt,
    /// Waiting callers run the interrupt body themselves.
    Polled,
}

#[derive(Debug, Clone, Copy)]
pub struct SpiEngineConfig {
    /// Clock feeding the core's SCLK divider
    pub ref_clk_hz: u32,
    /// SCLK rate used by [`SpiEngine::write_and_read`]
    pub max_speed_hz: u32,
    /// SPI mode used by [`SpiEngine::write_and_read`]
    pub mode: Mode,
    pub service: ServiceMode,
    /// Iterations a blocking wait spins before giving up
    pub poll_limit: u32,
    /// Bound on an async wait
    pub timeout: Duration,
    /// Offload slots implemented by the core
    pub offload_slots: u8,
    /// Entries in each offload command memory
    pub offload_cmd_mem_depth: usize,
    /// Entries in each offload SDO memory
    pub offload_sdo_mem_depth: usize,
}

impl SpiEngineConfig {
    pub const fn new(ref_clk_hz: u32) -> Self {
        Self {
            ref_clk_hz,
            max_speed_hz: ref_clk_hz / 2,
            mode: MODE_0,
            service: ServiceMode::Polled,
            poll_limit: 1_000_000,
            timeout: Duration::from_millis(100),
            offload_slots: 1,
            offload_cmd_mem_depth: 16,
            offload_sdo_mem_depth: 16,
        }
    }
}

impl Default for SpiEngineConfig {
    fn default() -> Self {
        Self::new(100_000_000)
    }
}

/// Where the in-flight message is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    Idle,
    /// Instructions remain to be pushed into the command FIFO
    FeedingCommands,
    /// All instructions queued, transmit words remain
    FeedingData,
    /// Everything queued, waiting for receive words and the SYNC
    DrainingReceive,
    /// SYNC echoed back, received words wait for [`SpiEngine::finish`]
    Retired,
}

/// Outstanding work of the in-flight message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Progress {
    pub cmd_remaining: usize,
    pub tx_remaining: usize,
    pub rx_remaining: usize,
}

/// Handle for an issued message, identified by its sync id
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket {
    sync_id: u8,
}

impl Ticket {
    pub fn sync_id(&self) -> u8 {
        self.sync_id
    }
}

/// Cancels a pending wait's message when its future is dropped.
struct CancelOnDrop<'e, R: RegisterIo, const N: usize> {
    engine: &'e SpiEngine<R, N>,
    ticket: Option<Ticket>,
}

impl<R: RegisterIo, const N: usize> Drop for CancelOnDrop<'_, R, N> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.engine.cancel(ticket);
        }
    }
}

/// The interrupt-controller side of the engine's IRQ line.
pub trait IrqLine {
    type Error;

    /// Route and unmask the line.
    fn enable(&mut self) -> Result<(), Self::Error>;
}

pub(crate) struct Inner<const N: usize> {
    pub(crate) ready: bool,
    service: ServiceMode,
    state: TransferState,
    sync_id: u8,
    completed_id: u8,
    int_enable: u32,
    program: Program,
    cmd_pos: usize,
    tx: Vec<u8, N>,
    tx_pos: usize,
    rx: Vec<u8, N>,
    rx_expected: usize,
    rx_keep: usize,
    /// One bit per offload slot currently replaying
    pub(crate) offload_enabled: u8,
}

impl<const N: usize> Inner<N> {
    const fn new(service: ServiceMode) -> Self {
        Self {
            ready: false,
            service,
            state: TransferState::Idle,
            sync_id: 0,
            completed_id: 0,
            int_enable: 0,
            program: Program::new(),
            cmd_pos: 0,
            tx: Vec::new(),
            tx_pos: 0,
            rx: Vec::new(),
            rx_expected: 0,
            rx_keep: 0,
            offload_enabled: 0,
        }
    }

    pub(crate) fn in_flight(&self) -> bool {
        !matches!(self.state, TransferState::Idle | TransferState::Retired)
    }

    /// The engine still holds `ticket`'s message, running or retired.
    fn owns(&self, ticket: Ticket) -> bool {
        self.state != TransferState::Idle && self.sync_id == ticket.sync_id
    }

    fn progress(&self) -> Progress {
        Progress {
            cmd_remaining: self.program.len() - self.cmd_pos,
            tx_remaining: self.tx.len() - self.tx_pos,
            rx_remaining: self.rx_expected - self.rx.len(),
        }
    }

    fn pending_state(&self) -> TransferState {
        let progress = self.progress();
        if progress.cmd_remaining > 0 {
            TransferState::FeedingCommands
        } else if progress.tx_remaining > 0 {
            TransferState::FeedingData
        } else {
            TransferState::DrainingReceive
        }
    }

    fn transition(&mut self, next: TransferState) {
        if self.state != next {
            trace!("spi engine: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn clear_cursors(&mut self) {
        self.program = Program::new();
        self.cmd_pos = 0;
        self.tx.clear();
        self.tx_pos = 0;
        self.rx.clear();
        self.rx_expected = 0;
        self.rx_keep = 0;
    }

    /// Push as many instructions as the command FIFO has room for.
    /// Returns true while instructions remain.
    fn feed_cmd_fifo(&mut self, io: &impl RegisterIo) -> bool {
        let room = io.read(regs::CMD_FIFO_ROOM) as usize;
        let pending = &self.program.instructions()[self.cmd_pos..];
        let n = min(room, pending.len());
        for &insn in &pending[..n] {
            io.write(regs::CMD_FIFO, insn.into());
        }
        self.cmd_pos += n;
        self.cmd_pos < self.program.len()
    }

    /// Push as many transmit words as the SDO FIFO has room for.
    /// Returns true while words remain.
    fn feed_tx_fifo(&mut self, io: &impl RegisterIo) -> bool {
        let room = io.read(regs::SDO_FIFO_ROOM) as usize;
        let pending = &self.tx[self.tx_pos..];
        let n = min(room, pending.len());
        for &word in &pending[..n] {
            io.write(regs::SDO_DATA_FIFO, word as u32);
        }
        self.tx_pos += n;
        self.tx_pos < self.tx.len()
    }

    /// Pop whatever the SDI FIFO holds for this message.
    /// Returns true while receive words are still expected.
    fn drain_rx_fifo(&mut self, io: &impl RegisterIo) -> bool {
        let level = io.read(regs::SDI_FIFO_LEVEL) as usize;
        let wanted = self.rx_expected - self.rx.len();
        let n = min(min(level, wanted), self.rx.capacity() - self.rx.len());
        for _ in 0..n {
            let word = io.read(regs::SDI_DATA_FIFO) as u8;
            if self.rx.push(word).is_err() {
                break;
            }
        }
        self.rx.len() < self.rx_expected
    }
}

/// Driver for one SPI Engine core.
///
/// `N` bounds the words of a single message; transmit and receive data are
/// staged in engine-owned buffers of that size so the interrupt handler never
/// touches caller memory.
pub struct SpiEngine<R, const N: usize = 256> {
    pub(crate) regs: R,
    pub(crate) config: SpiEngineConfig,
    pub(crate) inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<N>>>,
    done: Signal<CriticalSectionRawMutex, u8>,
}

impl<R: RegisterIo, const N: usize> SpiEngine<R, N> {
    pub const fn new(regs: R, config: SpiEngineConfig) -> Self {
        Self {
            regs,
            inner: Mutex::new(RefCell::new(Inner::new(config.service))),
            done: Signal::new(),
            config,
        }
    }

    /// Check the core version, reset it and mask every interrupt source.
    pub fn setup(&self) -> Result<Version, Error> {
        let version = Version::from_raw(self.regs.read(regs::VERSION));
        if version.major != SUPPORTED_MAJOR {
            error!(
                "spi engine: unsupported core version {=u8}.{=u8}.{=u8}",
                version.major,
                version.minor,
                version.patch
            );
            return Err(Error::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
                patch: version.patch,
            });
        }

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            self.regs.write(regs::RESET, 1);
            self.regs.write(regs::RESET, 0);
            self.regs.write(regs::INT_ENABLE, 0);
            self.regs.write(regs::INT_PENDING, irq::ALL);
            inner.clear_cursors();
            inner.int_enable = 0;
            inner.sync_id = 0;
            inner.completed_id = 0;
            inner.state = TransferState::Idle;
            inner.ready = true;
        });
        self.done.reset();

        info!(
            "spi engine: core {=u8}.{=u8}.{=u8}, ref clock {=u32} Hz",
            version.major,
            version.minor,
            version.patch,
            self.config.ref_clk_hz
        );
        Ok(version)
    }

    /// Switch to interrupt-driven service once `line` is routed to
    /// [`handle_interrupt`](Self::handle_interrupt).
    ///
    /// On failure the engine keeps servicing the core by polling.
    pub fn attach_irq<I: IrqLine>(&self, line: &mut I) -> Result<(), Error> {
        if line.enable().is_err() {
            error!("spi engine: irq registration failed, staying in polled mode");
            return Err(Error::IrqRegistration);
        }
        self.inner.lock(|inner| inner.borrow_mut().service = ServiceMode::Interrupt);
        Ok(())
    }

    pub fn config(&self) -> &SpiEngineConfig {
        &self.config
    }

    pub fn service_mode(&self) -> ServiceMode {
        self.inner.lock(|inner| inner.borrow().service)
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock(|inner| inner.borrow().state)
    }

    pub fn progress(&self) -> Progress {
        self.inner.lock(|inner| inner.borrow().progress())
    }

    /// Id given to the most recently issued program.
    pub fn sync_id(&self) -> u8 {
        self.inner.lock(|inner| inner.borrow().sync_id)
    }

    /// Id of the last SYNC the core reported as retired.
    pub fn completed_id(&self) -> u8 {
        self.inner.lock(|inner| inner.borrow().completed_id)
    }

    /// Compile `msg` and push the first burst into the core.
    ///
    /// Fails with [`Error::Busy`] while another message is in flight or its
    /// received words have not been collected with [`finish`](Self::finish).
    pub fn start(&self, msg: &Message<'_>) -> Result<Ticket, Error> {
        let len = msg.len();
        if len > N {
            return Err(Error::TransferTooLong);
        }

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !inner.ready {
                return Err(Error::NotInitialized);
            }
            if inner.state != TransferState::Idle {
                return Err(Error::Busy);
            }
            if inner.offload_enabled != 0 {
                return Err(Error::OffloadActive);
            }

            let sync_id = inner.sync_id.wrapping_add(1);
            let program = Program::compile(msg, self.config.ref_clk_hz, sync_id)?;

            inner.clear_cursors();
            inner.sync_id = sync_id;
            inner.program = program;
            if !msg.tx.is_empty() {
                inner.tx.extend(msg.tx.iter().copied().chain(repeat(TX_PAD)).take(len));
            }
            if msg.rx_len > 0 {
                inner.rx_expected = len;
                inner.rx_keep = msg.rx_len;
            }
            self.done.reset();
            self.regs.write(regs::INT_PENDING, irq::SYNC);

            let mut enable = irq::SYNC;
            if inner.feed_cmd_fifo(&self.regs) {
                enable |= irq::CMD_ALMOST_EMPTY;
            }
            if inner.feed_tx_fifo(&self.regs) {
                enable |= irq::SDO_ALMOST_EMPTY;
            }
            if inner.drain_rx_fifo(&self.regs) {
                enable |= irq::SDI_ALMOST_FULL;
            }
            inner.int_enable = enable;
            self.regs.write(regs::INT_ENABLE, enable);

            let next = inner.pending_state();
            inner.transition(next);
            debug!(
                "spi engine: issued sync {=u8}, {=usize} instructions, {=usize} words",
                sync_id,
                inner.program.len(),
                len
            );
            Ok(Ticket { sync_id })
        })
    }

    /// Interrupt service routine for the engine's IRQ line.
    ///
    /// Continues feeding the command and SDO FIFOs, drains the SDI FIFO and
    /// narrows the interrupt mask to the sources that still have work.
    pub fn handle_interrupt(&self) {
        let retired = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let pending = self.regs.read(regs::INT_PENDING) & inner.int_enable;
            if pending == 0 {
                return None;
            }
            trace!("spi engine: irq pending {=u32:#x}", pending);

            let mut disable = 0;
            let mut retired = None;
            if pending & irq::SYNC != 0 {
                self.regs.write(regs::INT_PENDING, irq::SYNC);
                let echoed = self.regs.read(regs::SYNC_ID) as u8;
                if inner.in_flight() && echoed == inner.sync_id {
                    inner.completed_id = echoed;
                    disable |= irq::SYNC;
                    retired = Some(echoed);
                } else {
                    warn!("spi engine: stale sync {=u8} while waiting for {=u8}", echoed, inner.sync_id);
                }
            }
            if pending & irq::CMD_ALMOST_EMPTY != 0 && !inner.feed_cmd_fifo(&self.regs) {
                disable |= irq::CMD_ALMOST_EMPTY;
            }
            if pending & irq::SDO_ALMOST_EMPTY != 0 && !inner.feed_tx_fifo(&self.regs) {
                disable |= irq::SDO_ALMOST_EMPTY;
            }
            if pending & (irq::SDI_ALMOST_FULL | irq::SYNC) != 0 && !inner.drain_rx_fifo(&self.regs) {
                disable |= irq::SDI_ALMOST_FULL;
            }

            if inner.int_enable & disable != 0 {
                inner.int_enable &= !disable;
                self.regs.write(regs::INT_ENABLE, inner.int_enable);
            }

            if retired.is_some() {
                inner.transition(TransferState::Retired);
            } else if inner.in_flight() {
                let next = inner.pending_state();
                inner.transition(next);
            }
            retired
        });

        if let Some(id) = retired {
            self.done.signal(id);
        }
    }

    /// State of `ticket`'s message, `None` once the engine no longer holds it.
    fn ticket_state(&self, ticket: Ticket) -> Option<TransferState> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.owns(ticket).then_some(inner.state)
        })
    }

    pub fn is_complete(&self, ticket: Ticket) -> bool {
        self.ticket_state(ticket) == Some(TransferState::Retired)
    }

    /// Copy the received words of a retired message into `rx` and release the
    /// engine. Returns the number of words copied.
    pub fn finish(&self, ticket: Ticket, rx: &mut [u8]) -> Result<usize, Error> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !inner.owns(ticket) {
                return Err(Error::StaleTicket);
            }
            if inner.state != TransferState::Retired {
                return Err(Error::Busy);
            }
            let n = min(min(rx.len(), inner.rx_keep), inner.rx.len());
            rx[..n].copy_from_slice(&inner.rx[..n]);
            inner.clear_cursors();
            inner.transition(TransferState::Idle);
            Ok(n)
        })
    }

    /// Block until `ticket` retires, giving up after `poll_limit` iterations.
    ///
    /// A ticket whose message was already finished or cancelled fails with
    /// [`Error::StaleTicket`] without touching the core.
    pub fn wait(&self, ticket: Ticket) -> Result<(), Error> {
        let polled = self.service_mode() == ServiceMode::Polled;
        let mut polls = 0;
        loop {
            match self.ticket_state(ticket) {
                None => return Err(Error::StaleTicket),
                Some(TransferState::Retired) => return Ok(()),
                Some(_) => {}
            }
            if polls == self.config.poll_limit {
                break;
            }
            polls += 1;
            if polled {
                self.handle_interrupt();
            }
            spin_loop();
        }
        warn!(
            "spi engine: sync {=u8} timed out, sources {=u32:#x}",
            ticket.sync_id,
            self.regs.read(regs::INT_SOURCE)
        );
        self.cancel(ticket);
        Err(Error::Timeout)
    }

    /// Wait for `ticket` without blocking the executor, bounded by `config.timeout`.
    ///
    /// Dropping the future before it resolves cancels the message.
    pub async fn wait_async(&self, ticket: Ticket) -> Result<(), Error> {
        let mut guard = CancelOnDrop { engine: self, ticket: Some(ticket) };
        let retire = async {
            loop {
                match self.ticket_state(ticket) {
                    None => return Err(Error::StaleTicket),
                    Some(TransferState::Retired) => return Ok(()),
                    Some(_) => {}
                }
                if self.service_mode() == ServiceMode::Polled {
                    self.handle_interrupt();
                    embassy_futures::yield_now().await;
                } else {
                    self.done.wait().await;
                }
            }
        };
        let result = match with_timeout(self.config.timeout, retire).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "spi engine: sync {=u8} timed out, sources {=u32:#x}",
                    ticket.sync_id,
                    self.regs.read(regs::INT_SOURCE)
                );
                self.cancel(ticket);
                Err(Error::Timeout)
            }
        };
        guard.ticket = None;
        result
    }

    /// Drop `ticket`'s message and release the engine.
    ///
    /// A message still running is stopped by resetting the core; a retired one
    /// loses its received words. Does nothing once the ticket no longer holds
    /// the engine.
    pub fn cancel(&self, ticket: Ticket) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !inner.owns(ticket) {
                return;
            }
            if inner.in_flight() {
                self.regs.write(regs::INT_ENABLE, 0);
                self.regs.write(regs::RESET, 1);
                self.regs.write(regs::RESET, 0);
                self.regs.write(regs::INT_PENDING, irq::ALL);
                inner.int_enable = 0;
            }
            inner.clear_cursors();
            inner.transition(TransferState::Idle);
            debug!("spi engine: sync {=u8} cancelled", ticket.sync_id);
        });
    }

    /// Issue `msg`, wait for it to retire and collect its received words.
    pub fn transfer_one_message(&self, msg: &Message<'_>, rx: &mut [u8]) -> Result<usize, Error> {
        let ticket = self.start(msg)?;
        self.wait(ticket)?;
        self.finish(ticket, rx)
    }

    pub async fn transfer_async(&self, msg: &Message<'_>, rx: &mut [u8]) -> Result<usize, Error> {
        let ticket = self.start(msg)?;
        self.wait_async(ticket).await?;
        self.finish(ticket, rx)
    }

    /// Full-duplex transfer in place on `chip_select`, framed by chip-select
    /// assert and release, at the configured default rate and mode.
    pub fn write_and_read(&self, chip_select: u8, data: &mut [u8]) -> Result<(), Error> {
        let ticket = {
            let msg = Message::new(chip_select, self.config.max_speed_hz)
                .with_mode(self.config.mode)
                .with_tx(&data[..])
                .with_rx_len(data.len())
                .with_cs_change(true);
            self.start(&msg)?
        };
        self.wait(ticket)?;
        self.finish(ticket, data)?;
        Ok(())
    }
}
