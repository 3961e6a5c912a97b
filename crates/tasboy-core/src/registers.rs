use serde::{Deserialize, Serialize};

/// Bits of the flags register (low byte of AF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Z = 0x80,
    N = 0x40,
    H = 0x20,
    C = 0x10,
}

impl Flag {
    #[inline]
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// A 16-bit register pair with a mask applied on every write.
///
/// The mask exists for AF, whose low nibble is hard-wired to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPair {
    value: u16,
    mask: u16,
}

impl RegisterPair {
    pub const fn new(value: u16) -> Self {
        Self::with_mask(value, 0xFFFF)
    }

    pub const fn with_mask(value: u16, mask: u16) -> Self {
        Self {
            value: value & mask,
            mask,
        }
    }

    #[inline]
    pub fn get(&self) -> u16 {
        self.value
    }

    #[inline]
    pub fn set(&mut self, value: u16) {
        self.value = value & self.mask;
    }

    #[inline]
    pub fn hi(&self) -> u8 {
        (self.value >> 8) as u8
    }

    #[inline]
    pub fn lo(&self) -> u8 {
        self.value as u8
    }

    #[inline]
    pub fn set_hi(&mut self, val: u8) {
        self.set(((val as u16) << 8) | (self.value & 0x00FF));
    }

    #[inline]
    pub fn set_lo(&mut self, val: u8) {
        self.set((self.value & 0xFF00) | val as u16);
    }

    #[inline]
    pub fn inc(&mut self) {
        self.set(self.value.wrapping_add(1));
    }

    #[inline]
    pub fn dec(&mut self) {
        self.set(self.value.wrapping_sub(1));
    }
}

impl Default for RegisterPair {
    fn default() -> Self {
        Self::new(0)
    }
}

/// The LR35902 register file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub af: RegisterPair,
    pub bc: RegisterPair,
    pub de: RegisterPair,
    pub hl: RegisterPair,
    pub sp: RegisterPair,
    pub pc: u16,
}

pub const AF_MASK: u16 = 0xFFF0;

const DMG_BOOT: [u16; 4] = [0x01B0, 0x0013, 0x00D8, 0x014D];
const CGB_BOOT: [u16; 4] = [0x1180, 0x0000, 0xFF56, 0x000D];

impl Registers {
    /// Register state left behind by the boot ROM.
    pub fn post_boot(cgb: bool) -> Self {
        let [af, bc, de, hl] = if cgb { CGB_BOOT } else { DMG_BOOT };
        Self {
            af: RegisterPair::with_mask(af, AF_MASK),
            bc: RegisterPair::new(bc),
            de: RegisterPair::new(de),
            hl: RegisterPair::new(hl),
            sp: RegisterPair::new(0xFFFE),
            pc: 0x0100,
        }
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.af.hi()
    }

    #[inline]
    pub fn set_a(&mut self, val: u8) {
        self.af.set_hi(val);
    }

    #[inline]
    pub fn f(&self) -> u8 {
        self.af.lo()
    }

    #[inline]
    pub fn set_f(&mut self, val: u8) {
        self.af.set_lo(val);
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        self.f() & flag.mask() != 0
    }

    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        let f = if on {
            self.f() | flag.mask()
        } else {
            self.f() & !flag.mask()
        };
        self.set_f(f);
    }

    /// Replace all four flags at once.
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        let f = if z { Flag::Z.mask() } else { 0 }
            | if n { Flag::N.mask() } else { 0 }
            | if h { Flag::H.mask() } else { 0 }
            | if c { Flag::C.mask() } else { 0 };
        self.set_f(f);
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::post_boot(false)
    }
}
