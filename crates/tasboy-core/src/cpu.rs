mod cb;

pub use cb::Operand;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::interrupts::Interrupt;
use crate::mmu::Mmu;
use crate::registers::{Flag, Registers};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

/// Cost of dispatching an interrupt (two wait states, push, jump).
pub const INTERRUPT_CYCLES: u32 = 20;

// Extra cycles when a conditional branch is taken.
const JR_TAKEN: u32 = 4;
const JP_TAKEN: u32 = 4;
const CALL_TAKEN: u32 = 12;
const RET_TAKEN: u32 = 12;

/// Base opcode costs in clock cycles, branch not taken. Zero marks the CB
/// prefix and the illegal opcodes.
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
//  x0  x1  x2  x3  x4  x5  x6  x7  x8  x9  xA  xB  xC  xD  xE  xF
     4, 12,  8,  8,  4,  4,  8,  4, 20,  8,  8,  8,  4,  4,  8,  4, // 0x
     4, 12,  8,  8,  4,  4,  8,  4, 12,  8,  8,  8,  4,  4,  8,  4, // 1x
     8, 12,  8,  8,  4,  4,  8,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 2x
     8, 12,  8,  8, 12, 12, 12,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 3x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 4x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 5x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 6x
     8,  8,  8,  8,  8,  8,  4,  8,  4,  4,  4,  4,  4,  4,  8,  4, // 7x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 8x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 9x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Ax
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Bx
     8, 12, 12, 16, 12, 16,  8, 16,  8, 16, 12,  0, 12, 24,  8, 16, // Cx
     8, 12, 12,  0, 12, 16,  8, 16,  8, 16, 12,  0, 12,  0,  8, 16, // Dx
    12, 12,  8,  0,  0, 16,  8, 16, 16,  4, 16,  0,  0,  0,  8, 16, // Ex
    12, 12,  8,  4,  0, 16,  8, 16, 12,  8, 16,  4,  0,  0,  8, 16, // Fx
];

/// Instruction interpreter state. Memory lives in the [`Mmu`] passed to
/// every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub regs: Registers,
    pub ime: bool,
    /// Set by EI. Promoted to IME at the next interrupt check.
    ime_pending: bool,
    pub halted: bool,
}

impl Cpu {
    /// CPU in the state the boot ROM leaves it in.
    pub fn new(cgb: bool) -> Self {
        Self {
            regs: Registers::post_boot(cgb),
            ime: false,
            ime_pending: false,
            halted: false,
        }
    }

    #[inline]
    fn fetch8(&mut self, mmu: &Mmu) -> u8 {
        let val = mmu.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        val
    }

    #[inline]
    fn fetch16(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, mmu: &mut Mmu, val: u16) {
        let sp = self.regs.sp.get().wrapping_sub(2);
        self.regs.sp.set(sp);
        mmu.write_word(sp, val);
    }

    fn pop(&mut self, mmu: &Mmu) -> u16 {
        let sp = self.regs.sp.get();
        let val = mmu.read_word(sp);
        self.regs.sp.set(sp.wrapping_add(2));
        val
    }

    /// BC, DE, HL, SP by the two-bit index in bits 4-5.
    fn r16(&self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.regs.bc.get(),
            1 => self.regs.de.get(),
            2 => self.regs.hl.get(),
            3 => self.regs.sp.get(),
            _ => unreachable!(),
        }
    }

    fn set_r16(&mut self, index: u8, val: u16) {
        match index & 0x03 {
            0 => self.regs.bc.set(val),
            1 => self.regs.de.set(val),
            2 => self.regs.hl.set(val),
            3 => self.regs.sp.set(val),
            _ => unreachable!(),
        }
    }

    /// Branch condition NZ, Z, NC, C by the two-bit index in bits 3-4.
    fn condition(&self, index: u8) -> bool {
        match index & 0x03 {
            0 => !self.regs.flag(Flag::Z),
            1 => self.regs.flag(Flag::Z),
            2 => !self.regs.flag(Flag::C),
            3 => self.regs.flag(Flag::C),
            _ => unreachable!(),
        }
    }

    fn alu(&mut self, op: u8, val: u8) {
        let a = self.regs.a();
        let carry = self.regs.flag(Flag::C) as u8;
        match op & 0x07 {
            // ADD / ADC
            0 | 1 => {
                let c = if op & 0x07 == 1 { carry } else { 0 };
                let res = a as u16 + val as u16 + c as u16;
                let h = (a & 0x0F) + (val & 0x0F) + c > 0x0F;
                self.regs.set_a(res as u8);
                self.regs.set_flags(res as u8 == 0, false, h, res > 0xFF);
            }
            // SUB / SBC / CP
            2 | 3 | 7 => {
                let c = if op & 0x07 == 3 { carry } else { 0 };
                let res = a as i16 - val as i16 - c as i16;
                let h = ((a & 0x0F) as i16) - ((val & 0x0F) as i16) - (c as i16) < 0;
                if op & 0x07 != 7 {
                    self.regs.set_a(res as u8);
                }
                self.regs.set_flags(res as u8 == 0, true, h, res < 0);
            }
            // AND
            4 => {
                let res = a & val;
                self.regs.set_a(res);
                self.regs.set_flags(res == 0, false, true, false);
            }
            // XOR
            5 => {
                let res = a ^ val;
                self.regs.set_a(res);
                self.regs.set_flags(res == 0, false, false, false);
            }
            // OR
            6 => {
                let res = a | val;
                self.regs.set_a(res);
                self.regs.set_flags(res == 0, false, false, false);
            }
            _ => unreachable!(),
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        let c = self.regs.flag(Flag::C);
        self.regs.set_flags(res == 0, false, val & 0x0F == 0x0F, c);
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        let c = self.regs.flag(Flag::C);
        self.regs.set_flags(res == 0, true, val & 0x0F == 0, c);
        res
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.regs.hl.get();
        let z = self.regs.flag(Flag::Z);
        let h = (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF;
        let c = hl as u32 + val as u32 > 0xFFFF;
        self.regs.hl.set(hl.wrapping_add(val));
        self.regs.set_flags(z, false, h, c);
    }

    /// SP plus a signed offset, flagging carries out of bits 3 and 7.
    fn sp_offset(&mut self, offset: u8) -> u16 {
        let sp = self.regs.sp.get();
        let h = (sp & 0x0F) + (offset as u16 & 0x0F) > 0x0F;
        let c = (sp & 0xFF) + offset as u16 > 0xFF;
        self.regs.set_flags(false, false, h, c);
        sp.wrapping_add(offset as i8 as u16)
    }

    fn daa(&mut self) {
        let mut a = self.regs.a();
        let n = self.regs.flag(Flag::N);
        let h = self.regs.flag(Flag::H);
        let mut carry = self.regs.flag(Flag::C);
        if !n {
            if carry || a > 0x99 {
                a = a.wrapping_add(0x60);
                carry = true;
            }
            if h || a & 0x0F > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if carry {
                a = a.wrapping_sub(0x60);
            }
            if h {
                a = a.wrapping_sub(0x06);
            }
        }
        self.regs.set_a(a);
        self.regs.set_flags(a == 0, n, false, carry);
    }

    fn rotate_a(&mut self, op: u8) {
        let a = self.regs.a();
        let carry_in = self.regs.flag(Flag::C) as u8;
        let (res, carry) = match op {
            0x07 => (a.rotate_left(1), a & 0x80 != 0),
            0x0F => (a.rotate_right(1), a & 0x01 != 0),
            0x17 => ((a << 1) | carry_in, a & 0x80 != 0),
            0x1F => ((a >> 1) | (carry_in << 7), a & 0x01 != 0),
            _ => unreachable!(),
        };
        self.regs.set_a(res);
        self.regs.set_flags(false, false, false, carry);
    }

    /// Execute one instruction. Returns its cost in clock cycles.
    pub fn step(&mut self, mmu: &mut Mmu) -> u32 {
        let pc = self.regs.pc;
        let op = self.fetch8(mmu);
        cpu_trace!(
            "{pc:04X}: {op:02X} AF={:04X} BC={:04X} DE={:04X} HL={:04X} SP={:04X}",
            self.regs.af.get(),
            self.regs.bc.get(),
            self.regs.de.get(),
            self.regs.hl.get(),
            self.regs.sp.get()
        );

        let mut cycles = CYCLES[op as usize] as u32;
        match op {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.set_r16(op >> 4, val);
            }
            0x02 | 0x12 => mmu.write(self.r16(op >> 4), self.regs.a()),
            0x22 => {
                let hl = self.regs.hl.get();
                mmu.write(hl, self.regs.a());
                self.regs.hl.inc();
            }
            0x32 => {
                let hl = self.regs.hl.get();
                mmu.write(hl, self.regs.a());
                self.regs.hl.dec();
            }
            0x0A | 0x1A => {
                let val = mmu.read(self.r16(op >> 4));
                self.regs.set_a(val);
            }
            0x2A => {
                let val = mmu.read(self.regs.hl.get());
                self.regs.set_a(val);
                self.regs.hl.inc();
            }
            0x3A => {
                let val = mmu.read(self.regs.hl.get());
                self.regs.set_a(val);
                self.regs.hl.dec();
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let val = self.r16(op >> 4).wrapping_add(1);
                self.set_r16(op >> 4, val);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let val = self.r16(op >> 4).wrapping_sub(1);
                self.set_r16(op >> 4, val);
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let target = Operand::from_index(op >> 3);
                let val = target.read(&self.regs, mmu);
                let res = self.inc8(val);
                target.write(&mut self.regs, mmu, res);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let target = Operand::from_index(op >> 3);
                let val = target.read(&self.regs, mmu);
                let res = self.dec8(val);
                target.write(&mut self.regs, mmu, res);
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.fetch8(mmu);
                Operand::from_index(op >> 3).write(&mut self.regs, mmu, val);
            }
            0x07 | 0x0F | 0x17 | 0x1F => self.rotate_a(op),
            0x08 => {
                let addr = self.fetch16(mmu);
                mmu.write_word(addr, self.regs.sp.get());
            }
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl(self.r16(op >> 4)),
            0x10 => {
                // STOP is two bytes long.
                self.fetch8(mmu);
                mmu.try_speed_switch();
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition(op >> 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    cycles += JR_TAKEN;
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.regs.set_a(!self.regs.a());
                self.regs.set_flag(Flag::N, true);
                self.regs.set_flag(Flag::H, true);
            }
            0x37 => {
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, false);
                self.regs.set_flag(Flag::C, true);
            }
            0x3F => {
                let c = self.regs.flag(Flag::C);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, false);
                self.regs.set_flag(Flag::C, !c);
            }
            0x76 => self.halted = true,
            0x40..=0x7F => {
                let val = Operand::from_index(op).read(&self.regs, mmu);
                Operand::from_index(op >> 3).write(&mut self.regs, mmu, val);
            }
            0x80..=0xBF => {
                let val = Operand::from_index(op).read(&self.regs, mmu);
                self.alu(op >> 3, val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(mmu);
                self.alu(op >> 3, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                if self.condition(op >> 3) {
                    self.regs.pc = self.pop(mmu);
                    cycles += RET_TAKEN;
                }
            }
            0xC9 => self.regs.pc = self.pop(mmu),
            0xD9 => {
                self.regs.pc = self.pop(mmu);
                self.ime = true;
            }
            0xC1 | 0xD1 | 0xE1 => {
                let val = self.pop(mmu);
                self.set_r16((op >> 4) & 0x03, val);
            }
            0xF1 => {
                let val = self.pop(mmu);
                self.regs.af.set(val);
            }
            0xC5 | 0xD5 | 0xE5 => {
                let val = self.r16((op >> 4) & 0x03);
                self.push(mmu, val);
            }
            0xF5 => {
                let val = self.regs.af.get();
                self.push(mmu, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition(op >> 3) {
                    self.regs.pc = addr;
                    cycles += JP_TAKEN;
                }
            }
            0xC3 => self.regs.pc = self.fetch16(mmu),
            0xE9 => self.regs.pc = self.regs.hl.get(),
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition(op >> 3) {
                    let ret = self.regs.pc;
                    self.push(mmu, ret);
                    self.regs.pc = addr;
                    cycles += CALL_TAKEN;
                }
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                let ret = self.regs.pc;
                self.push(mmu, ret);
                self.regs.pc = addr;
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let ret = self.regs.pc;
                self.push(mmu, ret);
                self.regs.pc = (op & 0x38) as u16;
            }
            0xCB => {
                let cb_op = self.fetch8(mmu);
                cycles = self.execute_cb(mmu, cb_op);
            }
            0xE0 => {
                let offset = self.fetch8(mmu) as u16;
                mmu.write(0xFF00 | offset, self.regs.a());
            }
            0xF0 => {
                let offset = self.fetch8(mmu) as u16;
                let val = mmu.read(0xFF00 | offset);
                self.regs.set_a(val);
            }
            0xE2 => mmu.write(0xFF00 | self.regs.bc.lo() as u16, self.regs.a()),
            0xF2 => {
                let val = mmu.read(0xFF00 | self.regs.bc.lo() as u16);
                self.regs.set_a(val);
            }
            0xEA => {
                let addr = self.fetch16(mmu);
                mmu.write(addr, self.regs.a());
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                let val = mmu.read(addr);
                self.regs.set_a(val);
            }
            0xE8 => {
                let offset = self.fetch8(mmu);
                let val = self.sp_offset(offset);
                self.regs.sp.set(val);
            }
            0xF8 => {
                let offset = self.fetch8(mmu);
                let val = self.sp_offset(offset);
                self.regs.hl.set(val);
            }
            0xF9 => self.regs.sp.set(self.regs.hl.get()),
            0xF3 => {
                self.ime = false;
                self.ime_pending = false;
            }
            0xFB => self.ime_pending = true,
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                warn!("Illegal opcode {op:02X} at {pc:04X}");
                cycles = 4;
            }
        }
        cycles
    }

    /// Check for a pending interrupt and dispatch it. Returns the cycles
    /// spent, which is zero unless an interrupt was serviced.
    pub fn service_interrupts(&mut self, mmu: &mut Mmu) -> u32 {
        if self.ime_pending {
            self.ime_pending = false;
            self.ime = true;
            return 0;
        }

        let pending = mmu.if_reg & mmu.ie_reg & 0x1F;
        let Some(irq) = Interrupt::highest(pending) else {
            return 0;
        };

        if !self.ime {
            // A pending interrupt wakes HALT even with IME off.
            self.halted = false;
            return 0;
        }

        self.ime = false;
        self.halted = false;
        mmu.if_reg &= !irq.bit();
        let ret = self.regs.pc;
        self.push(mmu, ret);
        self.regs.pc = irq.vector();
        cpu_trace!("Interrupt {irq:?} -> {:04X}", irq.vector());
        INTERRUPT_CYCLES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    /// CPU and bus with `program` placed at 0xC000 and PC pointing at it.
    fn setup(program: &[u8]) -> (Cpu, Mmu) {
        let cart = Cartridge::new(vec![0u8; 0x8000]).unwrap();
        let mut mmu = Mmu::new(cart, false, 44_100);
        for (i, b) in program.iter().enumerate() {
            mmu.write(0xC000 + i as u16, *b);
        }
        let mut cpu = Cpu::new(false);
        cpu.regs.pc = 0xC000;
        (cpu, mmu)
    }

    #[test]
    fn post_boot_registers() {
        let cpu = Cpu::new(false);
        assert_eq!(cpu.regs.af.get(), 0x01B0);
        assert_eq!(cpu.regs.pc, 0x0100);
        let cpu = Cpu::new(true);
        assert_eq!(cpu.regs.a(), 0x11);
    }

    #[test]
    fn ld_and_add_set_flags() {
        // LD A,0x0F ; ADD A,0x01
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x0F, 0xC6, 0x01]);
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.regs.a(), 0x10);
        assert!(cpu.regs.flag(Flag::H));
        assert!(!cpu.regs.flag(Flag::Z));
        assert!(!cpu.regs.flag(Flag::C));
    }

    #[test]
    fn sub_borrow_and_cp_keeps_a() {
        // LD A,0x10 ; SUB 0x20 ; CP 0xF0
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x10, 0xD6, 0x20, 0xFE, 0xF0]);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.a(), 0xF0);
        assert!(cpu.regs.flag(Flag::C));
        assert!(cpu.regs.flag(Flag::N));
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.a(), 0xF0);
        assert!(cpu.regs.flag(Flag::Z));
    }

    #[test]
    fn conditional_jump_costs() {
        // XOR A ; JR NZ,+2 ; JR Z,+0
        let (mut cpu, mut mmu) = setup(&[0xAF, 0x20, 0x02, 0x28, 0x00]);
        cpu.step(&mut mmu);
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.step(&mut mmu), 12);
        assert_eq!(cpu.regs.pc, 0xC005);
    }

    #[test]
    fn call_and_ret() {
        // CALL 0xC010 ... at 0xC010: RET
        let mut program = vec![0u8; 0x11];
        program[..3].copy_from_slice(&[0xCD, 0x10, 0xC0]);
        program[0x10] = 0xC9;
        let (mut cpu, mut mmu) = setup(&program);
        assert_eq!(cpu.step(&mut mmu), 24);
        assert_eq!(cpu.regs.pc, 0xC010);
        assert_eq!(cpu.regs.sp.get(), 0xFFFC);
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(cpu.regs.pc, 0xC003);
        assert_eq!(cpu.regs.sp.get(), 0xFFFE);
    }

    #[test]
    fn pop_af_masks_low_nibble() {
        // LD BC,0x12FF ; PUSH BC ; POP AF
        let (mut cpu, mut mmu) = setup(&[0x01, 0xFF, 0x12, 0xC5, 0xF1]);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.af.get(), 0x12F0);
    }

    #[test]
    fn daa_after_bcd_add() {
        // LD A,0x45 ; ADD A,0x38 ; DAA
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x45, 0xC6, 0x38, 0x27]);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.a(), 0x83);
        assert!(!cpu.regs.flag(Flag::C));

        // LD A,0x99 ; ADD A,0x01 ; DAA
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x99, 0xC6, 0x01, 0x27]);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.a(), 0x00);
        assert!(cpu.regs.flag(Flag::Z));
        assert!(cpu.regs.flag(Flag::C));
    }

    #[test]
    fn cb_ops_and_costs() {
        // LD B,0x81 ; RLC B ; SWAP B ; BIT 7,B ; LD HL,0xC100 ; SET 3,(HL) ; BIT 3,(HL)
        let (mut cpu, mut mmu) = setup(&[
            0x06, 0x81, 0xCB, 0x00, 0xCB, 0x30, 0xCB, 0x78, 0x21, 0x00, 0xC1, 0xCB, 0xDE, 0xCB,
            0x5E,
        ]);
        cpu.step(&mut mmu);
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.regs.bc.hi(), 0x03);
        assert!(cpu.regs.flag(Flag::C));
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.bc.hi(), 0x30);
        assert!(!cpu.regs.flag(Flag::C));
        assert_eq!(cpu.step(&mut mmu), 8);
        assert!(cpu.regs.flag(Flag::Z));
        cpu.step(&mut mmu);
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(mmu.read(0xC100), 0x08);
        assert_eq!(cpu.step(&mut mmu), 12);
        assert!(!cpu.regs.flag(Flag::Z));
    }

    #[test]
    fn add_sp_signed_offset() {
        // LD SP,0x00F8 ; ADD SP,-8 ; LD HL,SP+0x10
        let (mut cpu, mut mmu) = setup(&[0x31, 0xF8, 0x00, 0xE8, 0xF8, 0xF8, 0x10]);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.sp.get(), 0x00F0);
        assert!(cpu.regs.flag(Flag::C));
        cpu.step(&mut mmu);
        assert_eq!(cpu.regs.hl.get(), 0x0100);
        assert!(!cpu.regs.flag(Flag::Z));
    }

    #[test]
    fn illegal_opcode_is_a_four_cycle_nop() {
        let (mut cpu, mut mmu) = setup(&[0xD3]);
        assert_eq!(cpu.step(&mut mmu), 4);
        assert_eq!(cpu.regs.pc, 0xC001);
    }

    #[test]
    fn ei_delays_by_one_check() {
        let (mut cpu, mut mmu) = setup(&[0xFB, 0x00]);
        mmu.ie_reg = 0x01;
        mmu.if_reg = 0x01;
        cpu.step(&mut mmu);
        assert_eq!(cpu.service_interrupts(&mut mmu), 0);
        assert!(cpu.ime);
        assert_eq!(cpu.service_interrupts(&mut mmu), INTERRUPT_CYCLES);
        assert_eq!(cpu.regs.pc, 0x0040);
        assert!(!cpu.ime);
    }

    #[test]
    fn vblank_wins_over_timer() {
        let (mut cpu, mut mmu) = setup(&[0x00]);
        cpu.ime = true;
        mmu.ie_reg = 0x1F;
        mmu.if_reg = 0x05;
        assert_eq!(cpu.service_interrupts(&mut mmu), INTERRUPT_CYCLES);
        assert_eq!(cpu.regs.pc, 0x0040);
        assert_eq!(mmu.if_reg, 0x04);
        assert_eq!(mmu.read_word(cpu.regs.sp.get()), 0xC000);
    }

    #[test]
    fn halt_wakes_without_ime() {
        let (mut cpu, mut mmu) = setup(&[0x76]);
        cpu.step(&mut mmu);
        assert!(cpu.halted);
        assert_eq!(cpu.service_interrupts(&mut mmu), 0);
        assert!(cpu.halted);
        mmu.ie_reg = 0x04;
        mmu.if_reg = 0x04;
        assert_eq!(cpu.service_interrupts(&mut mmu), 0);
        assert!(!cpu.halted);
        assert_eq!(mmu.if_reg, 0x04);
    }
}
