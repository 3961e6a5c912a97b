#![allow(dead_code)]

use std::sync::Once;

pub const BANK_SIZE: usize = 0x4000;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Builds a minimal cartridge image: header fields plus a program at 0x0100.
/// Interrupt vectors hold RETI.
///
/// The first byte of every bank holds the bank number so tests can tell which
/// bank is mapped.
pub struct RomBuilder {
    banks: usize,
    cart_type: u8,
    ram_code: u8,
    cgb_flag: u8,
    title: &'static str,
    program: Vec<u8>,
    patches: Vec<(usize, Vec<u8>)>,
}

impl RomBuilder {
    pub fn new() -> Self {
        Self {
            banks: 2,
            cart_type: 0x00,
            ram_code: 0x00,
            cgb_flag: 0x00,
            title: "TASBOY TEST",
            program: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn banks(mut self, banks: usize) -> Self {
        self.banks = banks.max(2);
        self
    }

    pub fn cart_type(mut self, cart_type: u8) -> Self {
        self.cart_type = cart_type;
        self
    }

    pub fn ram_code(mut self, ram_code: u8) -> Self {
        self.ram_code = ram_code;
        self
    }

    pub fn cgb_flag(mut self, flag: u8) -> Self {
        self.cgb_flag = flag;
        self
    }

    /// Code executed from the entry point.
    pub fn program(mut self, code: &[u8]) -> Self {
        self.program = code.to_vec();
        self
    }

    /// Raw bytes at an absolute ROM offset.
    pub fn at(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut rom = vec![0u8; self.banks * BANK_SIZE];
        for bank in 0..self.banks {
            rom[bank * BANK_SIZE] = bank as u8;
        }
        // Every interrupt vector returns immediately.
        for vector in [0x40, 0x48, 0x50, 0x58, 0x60] {
            rom[vector] = 0xD9;
        }
        rom[0x100..0x100 + self.program.len()].copy_from_slice(&self.program);
        let title = self.title.as_bytes();
        let len = title.len().min(15);
        rom[0x134..0x134 + len].copy_from_slice(&title[..len]);
        rom[0x143] = self.cgb_flag;
        rom[0x147] = self.cart_type;
        rom[0x149] = self.ram_code;
        for (offset, bytes) in self.patches {
            rom[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        let sum = rom
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 0x14E && *i != 0x14F)
            .fold(0u16, |acc, (_, b)| acc.wrapping_add(*b as u16));
        rom[0x14E..0x150].copy_from_slice(&sum.to_be_bytes());
        rom
    }
}

impl Default for RomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A program that enables the given interrupts, then spins in a HALT loop.
pub fn halt_loop(ie: u8) -> Vec<u8> {
    vec![
        0x3E, ie, // LD A,ie
        0xE0, 0xFF, // LDH (FF),A
        0xFB, // EI
        0x76, // HALT
        0x18, 0xFD, // JR -3
    ]
}
