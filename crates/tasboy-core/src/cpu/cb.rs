//! CB-prefixed opcodes and the 3-bit operand encoding shared with the base table.

use super::Cpu;
use crate::mmu::Mmu;
use crate::registers::{Flag, Registers};

/// Register operand selected by the low three bits of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    B,
    C,
    D,
    E,
    H,
    L,
    /// The byte at address HL.
    HlInd,
    A,
}

impl Operand {
    #[inline]
    pub fn from_index(index: u8) -> Self {
        match index & 0x07 {
            0 => Operand::B,
            1 => Operand::C,
            2 => Operand::D,
            3 => Operand::E,
            4 => Operand::H,
            5 => Operand::L,
            6 => Operand::HlInd,
            7 => Operand::A,
            _ => unreachable!(),
        }
    }

    pub fn read(self, regs: &Registers, mmu: &Mmu) -> u8 {
        match self {
            Operand::B => regs.bc.hi(),
            Operand::C => regs.bc.lo(),
            Operand::D => regs.de.hi(),
            Operand::E => regs.de.lo(),
            Operand::H => regs.hl.hi(),
            Operand::L => regs.hl.lo(),
            Operand::HlInd => mmu.read(regs.hl.get()),
            Operand::A => regs.a(),
        }
    }

    pub fn write(self, regs: &mut Registers, mmu: &mut Mmu, val: u8) {
        match self {
            Operand::B => regs.bc.set_hi(val),
            Operand::C => regs.bc.set_lo(val),
            Operand::D => regs.de.set_hi(val),
            Operand::E => regs.de.set_lo(val),
            Operand::H => regs.hl.set_hi(val),
            Operand::L => regs.hl.set_lo(val),
            Operand::HlInd => mmu.write(regs.hl.get(), val),
            Operand::A => regs.set_a(val),
        }
    }
}

impl Cpu {
    /// Execute the CB opcode `op`. Returns its cycle cost.
    pub(super) fn execute_cb(&mut self, mmu: &mut Mmu, op: u8) -> u32 {
        let operand = Operand::from_index(op);
        let val = operand.read(&self.regs, mmu);
        let bit = (op >> 3) & 0x07;

        match op {
            0x00..=0x3F => {
                let carry_in = self.regs.flag(Flag::C);
                let (res, carry) = match bit {
                    // RLC
                    0 => (val.rotate_left(1), val & 0x80 != 0),
                    // RRC
                    1 => (val.rotate_right(1), val & 0x01 != 0),
                    // RL
                    2 => ((val << 1) | carry_in as u8, val & 0x80 != 0),
                    // RR
                    3 => ((val >> 1) | ((carry_in as u8) << 7), val & 0x01 != 0),
                    // SLA
                    4 => (val << 1, val & 0x80 != 0),
                    // SRA
                    5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
                    // SWAP
                    6 => (val.rotate_left(4), false),
                    // SRL
                    7 => (val >> 1, val & 0x01 != 0),
                    _ => unreachable!(),
                };
                operand.write(&mut self.regs, mmu, res);
                self.regs.set_flags(res == 0, false, false, carry);
            }
            0x40..=0x7F => {
                let c = self.regs.flag(Flag::C);
                self.regs.set_flags(val & (1 << bit) == 0, false, true, c);
                return if operand == Operand::HlInd { 12 } else { 8 };
            }
            0x80..=0xBF => operand.write(&mut self.regs, mmu, val & !(1 << bit)),
            0xC0..=0xFF => operand.write(&mut self.regs, mmu, val | (1 << bit)),
        }

        if operand == Operand::HlInd { 16 } else { 8 }
    }
}
