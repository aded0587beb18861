/// Errors reported by the SPI Engine driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The core reported a major version this driver does not speak
    UnsupportedVersion { major: u8, minor: u8, patch: u8 },
    /// `setup` has not completed successfully
    NotInitialized,
    /// A message is already in flight or waits to be finished
    Busy,
    /// The ticket's message was already finished or cancelled
    StaleTicket,
    /// The issued program did not retire within the configured bound
    Timeout,
    /// Chip-select index outside the engine's 8 lines
    InvalidChipSelect,
    /// Requested SCLK rate is zero or above the reference clock
    InvalidClock,
    /// Payload does not fit the engine's transfer buffers
    TransferTooLong,
    /// Compiled program does not fit the instruction buffer
    ProgramTooLong,
    /// The offload slot is replaying and must be disabled before reloading
    OffloadEnabled,
    /// An offload slot is replaying; interactive transfers would collide with it
    OffloadActive,
    /// Offload slot index not implemented by the core
    InvalidOffloadSlot,
    /// Program or payload exceeds the offload memories
    OffloadTooLarge,
    /// The interrupt line could not be registered
    IrqRegistration,
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}
