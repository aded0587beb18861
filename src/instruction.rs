//! Engine instruction set.
//!
//! Every instruction is one 16-bit word pushed into the command FIFO (or the
//! offload command memory) as the low half of a 32-bit register write:
//!
//! ```text
//!  15    12 11     8 7            0
//! [ opcode ][ arg1  ][    arg2     ]
//! ```
//!
//! | opcode | instruction | arg1 | arg2 |
//! |---|---|---|---|
//! | 0 | TRANSFER | bit0 write, bit1 read | words - 1 |
//! | 1 | ASSERT | delay | chip-select mask (0 = asserted) |
//! | 2 | WRITE | register | value |
//! | 3 | MISC | 0 = SYNC, 1 = SLEEP | id / periods - 1 |

const OP_TRANSFER: u16 = 0x0;
const OP_ASSERT: u16 = 0x1;
const OP_WRITE: u16 = 0x2;
const OP_MISC: u16 = 0x3;

const MISC_SYNC: u16 = 0x0;
const MISC_SLEEP: u16 = 0x1;

const TRANSFER_WRITE: u16 = 1 << 0;
const TRANSFER_READ: u16 = 1 << 1;

/// Chip-select mask with every line released (lines are active low).
pub const CS_NONE: u8 = 0xff;

/// Registers reachable through the `WRITE` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    ClkDiv,
    Config,
}

impl Register {
    const fn addr(self) -> u16 {
        match self {
            Register::ClkDiv => 0x0,
            Register::Config => 0x1,
        }
    }

    const fn from_addr(addr: u16) -> Option<Self> {
        match addr {
            0x0 => Some(Register::ClkDiv),
            0x1 => Some(Register::Config),
            _ => None,
        }
    }
}

/// Bits of the `CONFIG` register
pub mod config {
    pub const CPHA: u8 = 1 << 0;
    pub const CPOL: u8 = 1 << 1;
    pub const THREE_WIRE: u8 = 1 << 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Instruction {
    Write { register: Register, value: u8 },
    /// `mask` is the chip-select line pattern; a cleared bit selects the device.
    Assert { hold: u8, mask: u8 },
    /// Clock `len_minus_one + 1` words, shifting out and/or sampling in.
    Transfer { tx: bool, rx: bool, len_minus_one: u8 },
    Sync { id: u8 },
    /// Idle for `periods_minus_one + 1` SCLK periods.
    Sleep { periods_minus_one: u8 },
}

const fn word(op: u16, arg1: u16, arg2: u8) -> u16 {
    (op << 12) | ((arg1 & 0xf) << 8) | arg2 as u16
}

impl Instruction {
    pub const fn encode(self) -> u16 {
        match self {
            Instruction::Write { register, value } => word(OP_WRITE, register.addr(), value),
            Instruction::Assert { hold, mask } => word(OP_ASSERT, hold as u16, mask),
            Instruction::Transfer { tx, rx, len_minus_one } => {
                let mut flags = 0;
                if tx {
                    flags |= TRANSFER_WRITE;
                }
                if rx {
                    flags |= TRANSFER_READ;
                }
                word(OP_TRANSFER, flags, len_minus_one)
            }
            Instruction::Sync { id } => word(OP_MISC, MISC_SYNC, id),
            Instruction::Sleep { periods_minus_one } => word(OP_MISC, MISC_SLEEP, periods_minus_one),
        }
    }

    /// Inverse of [`encode`](Self::encode); `None` for words the core would not accept.
    pub const fn decode(word: u16) -> Option<Self> {
        let arg1 = (word >> 8) & 0xf;
        let arg2 = word as u8;
        match word >> 12 {
            OP_TRANSFER => {
                if arg1 & !(TRANSFER_WRITE | TRANSFER_READ) != 0 {
                    return None;
                }
                Some(Instruction::Transfer {
                    tx: arg1 & TRANSFER_WRITE != 0,
                    rx: arg1 & TRANSFER_READ != 0,
                    len_minus_one: arg2,
                })
            }
            OP_ASSERT => Some(Instruction::Assert { hold: arg1 as u8, mask: arg2 }),
            OP_WRITE => match Register::from_addr(arg1) {
                Some(register) => Some(Instruction::Write { register, value: arg2 }),
                None => None,
            },
            OP_MISC => match arg1 {
                MISC_SYNC => Some(Instruction::Sync { id: arg2 }),
                MISC_SLEEP => Some(Instruction::Sleep { periods_minus_one: arg2 }),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<Instruction> for u32 {
    fn from(insn: Instruction) -> u32 {
        insn.encode() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_match_core() {
        let cases = [
            (Instruction::Write { register: Register::ClkDiv, value: 4 }, 0x2004),
            (Instruction::Write { register: Register::Config, value: config::CPOL }, 0x2102),
            (Instruction::Assert { hold: 1, mask: 0xfe }, 0x11fe),
            (Instruction::Transfer { tx: true, rx: true, len_minus_one: 3 }, 0x0303),
            (Instruction::Transfer { tx: false, rx: true, len_minus_one: 0 }, 0x0200),
            (Instruction::Sync { id: 0x2a }, 0x302a),
            (Instruction::Sleep { periods_minus_one: 9 }, 0x3109),
        ];
        for (insn, raw) in cases {
            assert_eq!(insn.encode(), raw);
            assert_eq!(Instruction::decode(raw), Some(insn));
        }
    }

    #[test]
    fn rejects_unknown_words() {
        assert_eq!(Instruction::decode(0x4000), None);
        assert_eq!(Instruction::decode(0x2500), None);
        assert_eq!(Instruction::decode(0x3200), None);
        assert_eq!(Instruction::decode(0x0400), None);
    }
}
