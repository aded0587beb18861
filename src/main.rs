#![no_std]
#![no_main]

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;
use defmt::{error, info};
use embassy_executor::Spawner;
use spi_engine::{IrqLine, Message, Mmio, SpiEngine, SpiEngineConfig};
use {defmt_rtt as _, panic_probe as _};

const SPI_ENGINE_BASE: usize = 0x44a0_0000;
const REF_CLK_HZ: u32 = 100_000_000;
const ADC_CS: u8 = 0;

static ENGINE: SpiEngine<Mmio> = SpiEngine::new(
    // SAFETY: the engine's AXI slave is mapped at this address by the fabric
    // design and only ENGINE drives it.
    unsafe { Mmio::new(SPI_ENGINE_BASE) },
    SpiEngineConfig {
        max_speed_hz: 25_000_000,
        ..SpiEngineConfig::new(REF_CLK_HZ)
    },
);

/// Fabric interrupt lines of the soft core
#[derive(Clone, Copy)]
#[repr(u16)]
enum FabricIrq {
    SpiEngine = 0,
}

// SAFETY: discriminants match the vector table below.
unsafe impl InterruptNumber for FabricIrq {
    fn number(self) -> u16 {
        self as u16
    }
}

extern "C" fn spi_engine_irq() {
    ENGINE.handle_interrupt();
}

#[link_section = ".vector_table.interrupts"]
#[no_mangle]
static __INTERRUPTS: [unsafe extern "C" fn(); 1] = [spi_engine_irq];

struct Nvic;

impl IrqLine for Nvic {
    type Error = ();

    fn enable(&mut self) -> Result<(), ()> {
        // SAFETY: the handler only takes the engine's critical section.
        unsafe { NVIC::unmask(FabricIrq::SpiEngine) };
        if NVIC::is_enabled(FabricIrq::SpiEngine) {
            Ok(())
        } else {
            Err(())
        }
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    info!("SPI Engine demo starting");

    if let Err(e) = ENGINE.setup() {
        error!("setup failed: {}", e);
        loop {
            cortex_m::asm::wfi();
        }
    }
    if let Err(e) = ENGINE.attach_irq(&mut Nvic) {
        error!("continuing in polled mode: {}", e);
    }

    // Read the ADC's ID register a few times over the interactive path
    for _ in 0..3 {
        let mut frame = [0x80 | 0x02, 0x00, 0x00];
        match ENGINE.write_and_read(ADC_CS, &mut frame) {
            Ok(()) => info!("Received: {:02x}", frame),
            Err(e) => error!("transfer failed: {}", e),
        }
        cortex_m::asm::delay(REF_CLK_HZ);
    }

    // Hand conversion reads over to the offload path, one per trigger
    let conversion = Message::new(ADC_CS, 25_000_000).with_rx_len(2).with_cs_change(true);
    let armed = ENGINE.offload_load_msg(&conversion).and_then(|()| ENGINE.offload_enable(true));
    match armed {
        Ok(()) => info!("offload armed"),
        Err(e) => error!("offload failed: {}", e),
    }

    loop {
        cortex_m::asm::wfi();
    }
}
