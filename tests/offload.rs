mod common;

use common::{config, engine, FakeEngine};
use spi_engine::instruction::{Instruction, CS_NONE};
use spi_engine::program::OFFLOAD_SETTLE_SLEEP;
use spi_engine::{Error, Message, SpiEngine, SpiEngineConfig};

const CONVERSION: Message<'static> = Message::new(1, 10_000_000).with_tx(&[0x80, 0x00]).with_rx_len(2).with_cs_change(true);

fn decoded(words: &[u16]) -> Vec<Instruction> {
    words.iter().map(|&w| Instruction::decode(w).unwrap()).collect()
}

#[test]
fn load_fills_slot_memories() {
    let fake = FakeEngine::roomy();
    let engine = engine(&fake, config());
    engine.offload_load_msg(&CONVERSION).unwrap();

    let hw = fake.hw.borrow();
    let slot = &hw.slots[0];
    assert_eq!(slot.resets, 1);
    assert_eq!(slot.ctrl, 0);
    assert_eq!(slot.sdo_mem, [0x80, 0x00]);
    let program = decoded(&slot.cmd_mem);
    assert_eq!(program.len(), 7);
    assert_eq!(program[2], Instruction::Assert { hold: 1, mask: 0xfd });
    assert_eq!(program[4], Instruction::Assert { hold: 1, mask: CS_NONE });
    assert_eq!(program[5], Instruction::Sleep { periods_minus_one: OFFLOAD_SETTLE_SLEEP });
    assert_eq!(program[6], Instruction::Sync { id: 0 });

    // nothing went through the interactive path
    assert!(hw.cmd.is_empty());
    assert!(hw.slots[1].cmd_mem.is_empty());
}

#[test]
fn enabled_slot_refuses_reload() {
    let fake = FakeEngine::roomy();
    let engine = engine(&fake, config());
    engine.offload_load_msg(&CONVERSION).unwrap();
    engine.offload_enable(true).unwrap();
    assert_eq!(fake.hw.borrow().slots[0].ctrl, 1);
    assert!(engine.offload(0).unwrap().is_enabled());

    let other = Message::new(2, 1_000_000).with_rx_len(4);
    assert_eq!(engine.offload_load_msg(&other), Err(Error::OffloadEnabled));
    assert_eq!(fake.hw.borrow().slots[0].resets, 1);

    engine.offload_enable(false).unwrap();
    assert_eq!(fake.hw.borrow().slots[0].ctrl, 0);
    engine.offload_load_msg(&other).unwrap();
    let hw = fake.hw.borrow();
    assert_eq!(hw.slots[0].resets, 2);
    assert!(hw.slots[0].sdo_mem.is_empty());
}

#[test]
fn oversized_message_touches_nothing() {
    let fake = FakeEngine::roomy();
    let engine = engine(&fake, config());
    let writes = fake.hw.borrow().writes;

    let tx = [0u8; 17];
    assert_eq!(engine.offload_load_msg(&Message::new(0, 1_000_000).with_tx(&tx)), Err(Error::OffloadTooLarge));

    let engine_small: SpiEngine<_, 64> =
        SpiEngine::new(&fake, SpiEngineConfig { offload_cmd_mem_depth: 4, ..config() });
    engine_small.setup().unwrap();
    let writes_small = fake.hw.borrow().writes;
    assert_eq!(engine_small.offload_load_msg(&CONVERSION), Err(Error::OffloadTooLarge));

    let hw = fake.hw.borrow();
    assert_eq!(hw.slots[0].resets, 0);
    assert_eq!(hw.writes, writes_small);
    assert!(writes_small > writes);
}

#[test]
fn offload_and_interactive_exclude_each_other() {
    let fake = FakeEngine::roomy();
    let engine = engine(&fake, config());
    engine.offload_load_msg(&CONVERSION).unwrap();

    let ticket = engine.start(&Message::new(0, 1_000_000).with_rx_len(1)).unwrap();
    assert_eq!(engine.offload_enable(true), Err(Error::Busy));
    assert_eq!(fake.hw.borrow().slots[0].ctrl, 0);
    engine.wait(ticket).unwrap();
    engine.finish(ticket, &mut [0]).unwrap();

    engine.offload_enable(true).unwrap();
    let mut data = [0u8; 2];
    assert_eq!(engine.write_and_read(0, &mut data), Err(Error::OffloadActive));

    engine.offload_enable(false).unwrap();
    engine.write_and_read(0, &mut data).unwrap();
}

#[test]
fn slots_are_independent() {
    let fake = FakeEngine::roomy();
    let engine = engine(&fake, config());
    let slot1 = engine.offload(1).unwrap();
    assert_eq!(slot1.slot(), 1);
    slot1.load_msg(&CONVERSION).unwrap();
    slot1.enable(true).unwrap();

    let hw = fake.hw.borrow();
    assert!(hw.slots[0].cmd_mem.is_empty());
    assert_eq!(hw.slots[0].ctrl, 0);
    assert_eq!(hw.slots[1].cmd_mem.len(), 7);
    assert_eq!(hw.slots[1].ctrl, 1);
    drop(hw);

    assert!(!engine.offload(0).unwrap().is_enabled());
    assert!(matches!(engine.offload(2), Err(Error::InvalidOffloadSlot)));
}

#[test]
fn offload_needs_setup() {
    let fake = FakeEngine::roomy();
    let engine: SpiEngine<_, 64> = SpiEngine::new(&fake, config());
    assert_eq!(engine.offload_load_msg(&CONVERSION), Err(Error::NotInitialized));
    assert_eq!(engine.offload_enable(true), Err(Error::NotInitialized));
    assert_eq!(fake.hw.borrow().writes, 0);
}
