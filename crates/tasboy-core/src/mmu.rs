use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    apu::Apu,
    cartridge::Cartridge,
    input::{Button, Input},
    ppu::Ppu,
    sampler::{ApuEvent, ApuTap},
    timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;
const HDMA_BLOCK: u16 = 0x10;

/// CGB VRAM DMA (FF51-FF55).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HdmaState {
    /// Source pointer, low nibble always clear
    src: u16,
    /// Destination offset inside VRAM (0x0000-0x1FF0)
    dst: u16,
    /// Remaining 0x10-byte blocks of an H-blank transfer
    blocks: u8,
    /// H-blank transfer in progress
    active: bool,
}

/// The memory bus. Every CPU access goes through [`Mmu::read`] and
/// [`Mmu::write`], which route to the owning component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mmu {
    wram: Vec<u8>,
    wram_bank: usize,
    #[serde(with = "crate::byte_array")]
    hram: [u8; 0x7F],
    /// Backing store for I/O bytes no component claims.
    #[serde(with = "crate::byte_array")]
    io: [u8; 0x80],
    pub if_reg: u8,
    pub ie_reg: u8,
    pub cart: Cartridge,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub input: Input,
    key1: u8,
    double_speed: bool,
    hdma: HdmaState,
    cgb: bool,
    #[serde(skip)]
    tap: ApuTap,
}

impl Mmu {
    pub fn new(cart: Cartridge, cgb: bool, sample_rate: u32) -> Self {
        Self {
            wram: vec![0; WRAM_BANK_SIZE * 8],
            wram_bank: 1,
            hram: [0; 0x7F],
            io: [0xFF; 0x80],
            if_reg: 0x01,
            ie_reg: 0,
            cart,
            ppu: Ppu::new(cgb),
            apu: Apu::new(sample_rate),
            timer: Timer::new(),
            input: Input::new(),
            key1: 0,
            double_speed: false,
            hdma: HdmaState::default(),
            cgb,
            tap: ApuTap::default(),
        }
    }

    pub fn cgb(&self) -> bool {
        self.cgb
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    /// CPU cycles per video cycle.
    pub fn speed_factor(&self) -> u32 {
        if self.double_speed { 2 } else { 1 }
    }

    /// Called by STOP. Toggles double speed if KEY1 armed it.
    pub fn try_speed_switch(&mut self) -> bool {
        if !self.cgb || self.key1 & 0x01 == 0 {
            return false;
        }
        self.double_speed = !self.double_speed;
        self.key1 = 0;
        debug!(
            "Speed switch: {}",
            if self.double_speed { "double" } else { "normal" }
        );
        true
    }

    /// Forward subsequent audio writes to `tap`.
    pub fn set_tap(&mut self, tap: ApuTap) {
        self.tap = tap;
    }

    pub fn take_tap(&mut self) -> ApuTap {
        std::mem::take(&mut self.tap)
    }

    /// Push the full audio state to the sampler.
    pub fn resync_audio(&self) {
        self.tap.send(ApuEvent::Resync(Box::new(self.apu.clone())));
    }

    /// Mute or unmute audio channel `channel` (0-3) here and in the sampler.
    pub fn set_channel_muted(&mut self, channel: usize, muted: bool) {
        self.apu.set_channel_muted(channel, muted);
        self.tap.send(ApuEvent::Mute { channel, muted });
    }

    pub fn press_button(&mut self, button: Button) {
        self.input.press(button, &mut self.if_reg);
    }

    pub fn release_button(&mut self, button: Button) {
        self.input.release(button);
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.read(addr),
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xC000..=0xCFFF => self.wram[addr as usize - 0xC000],
            0xD000..=0xDFFF => self.wram[self.wram_bank * WRAM_BANK_SIZE + addr as usize - 0xD000],
            0xE000..=0xFDFF => self.read(addr - 0x2000),
            0xFE00..=0xFE9F => self.ppu.read_oam(addr),
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.input.read(),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => 0xE0 | self.if_reg,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF4D => {
                if self.cgb {
                    let speed = if self.double_speed { 0x80 } else { 0 };
                    0x7E | speed | (self.key1 & 0x01)
                } else {
                    0xFF
                }
            }
            0xFF4F | 0xFF68..=0xFF6B => self.ppu.read_reg(addr),
            0xFF51..=0xFF54 => 0xFF,
            0xFF55 => {
                if self.cgb && self.hdma.active {
                    self.hdma.blocks.wrapping_sub(1) & 0x7F
                } else {
                    0xFF
                }
            }
            0xFF70 => {
                if self.cgb {
                    0xF8 | self.wram_bank as u8
                } else {
                    0xFF
                }
            }
            0xFF80..=0xFFFE => self.hram[addr as usize - 0xFF80],
            0xFFFF => self.ie_reg,
            _ => self.io[addr as usize - 0xFF00],
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.write(addr, val),
            0x8000..=0x9FFF => self.ppu.write_vram(addr, val),
            0xC000..=0xCFFF => self.wram[addr as usize - 0xC000] = val,
            0xD000..=0xDFFF => {
                self.wram[self.wram_bank * WRAM_BANK_SIZE + addr as usize - 0xD000] = val
            }
            0xE000..=0xFDFF => self.write(addr - 0x2000, val),
            0xFE00..=0xFE9F => self.ppu.write_oam(addr, val),
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.input.write(val),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.if_reg = val & 0x1F,
            0xFF10..=0xFF3F => {
                self.apu.write_reg(addr, val);
                self.tap.send(ApuEvent::Write { addr, val });
            }
            0xFF46 => {
                self.ppu.write_reg(addr, val);
                self.oam_dma(val);
            }
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF4D => {
                if self.cgb {
                    self.key1 = val & 0x01;
                }
            }
            0xFF4F | 0xFF68..=0xFF6B => self.ppu.write_reg(addr, val),
            0xFF51..=0xFF55 => {
                if self.cgb {
                    self.write_hdma(addr, val);
                }
            }
            0xFF70 => {
                if self.cgb {
                    self.wram_bank = match val & 0x07 {
                        0 => 1,
                        n => n as usize,
                    };
                }
            }
            0xFF80..=0xFFFE => self.hram[addr as usize - 0xFF80] = val,
            0xFFFF => self.ie_reg = val,
            _ => self.io[addr as usize - 0xFF00] = val,
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write(addr, lo);
        self.write(addr.wrapping_add(1), hi);
    }

    /// Advance the divider/TIMA and the cartridge clock by CPU cycles.
    pub fn step_timers(&mut self, cycles: u32) {
        self.timer.step(cycles, &mut self.if_reg);
        self.cart.step_rtc(cycles);
    }

    /// Advance the PPU by video cycles and run any due H-blank DMA block.
    pub fn step_video(&mut self, cycles: u32) {
        if self.ppu.step(cycles, &mut self.if_reg) {
            self.hdma_hblank_block();
        }
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for i in 0..0xA0u16 {
            let byte = self.read(base + i);
            self.ppu.write_oam(0xFE00 + i, byte);
        }
        trace!("OAM DMA from {base:04X}");
    }

    fn write_hdma(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF51 => self.hdma.src = ((val as u16) << 8) | (self.hdma.src & 0x00F0),
            0xFF52 => self.hdma.src = (self.hdma.src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 => self.hdma.dst = (((val & 0x1F) as u16) << 8) | (self.hdma.dst & 0x00F0),
            0xFF54 => self.hdma.dst = (self.hdma.dst & 0x1F00) | (val & 0xF0) as u16,
            0xFF55 => {
                if self.hdma.active && val & 0x80 == 0 {
                    self.hdma.active = false;
                    debug!("HDMA cancelled with {} blocks left", self.hdma.blocks);
                    return;
                }
                let blocks = (val & 0x7F) + 1;
                if val & 0x80 != 0 {
                    self.hdma.blocks = blocks;
                    self.hdma.active = true;
                    debug!(
                        "HDMA armed: {blocks} blocks {:04X} -> {:04X}",
                        self.hdma.src,
                        0x8000 | self.hdma.dst
                    );
                    if self.ppu.in_hblank() {
                        self.hdma_hblank_block();
                    }
                } else {
                    debug!(
                        "GDMA: {blocks} blocks {:04X} -> {:04X}",
                        self.hdma.src,
                        0x8000 | self.hdma.dst
                    );
                    for _ in 0..blocks {
                        self.copy_block();
                    }
                }
            }
            _ => unreachable!("not an HDMA register: {addr:04X}"),
        }
    }

    fn hdma_hblank_block(&mut self) {
        if !self.hdma.active {
            return;
        }
        self.copy_block();
        self.hdma.blocks -= 1;
        if self.hdma.blocks == 0 {
            self.hdma.active = false;
            trace!("HDMA complete");
        }
    }

    fn copy_block(&mut self) {
        for _ in 0..HDMA_BLOCK {
            let byte = self.read(self.hdma.src);
            self.ppu.write_vram(0x8000 | self.hdma.dst, byte);
            self.hdma.src = self.hdma.src.wrapping_add(1);
            self.hdma.dst = (self.hdma.dst + 1) & 0x1FFF;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom(cgb_flag: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x143] = cgb_flag;
        rom
    }

    fn mmu(cgb: bool) -> Mmu {
        let cart = Cartridge::new(rom(if cgb { 0x80 } else { 0x00 })).unwrap();
        Mmu::new(cart, cgb, 44_100)
    }

    #[test]
    fn echo_ram_mirrors_wram() {
        let mut mmu = mmu(false);
        mmu.write(0xC123, 0x42);
        assert_eq!(mmu.read(0xE123), 0x42);
        mmu.write(0xFDFF, 0x99);
        assert_eq!(mmu.read(0xDDFF), 0x99);
    }

    #[test]
    fn if_upper_bits_read_as_one() {
        let mut mmu = mmu(false);
        mmu.write(0xFF0F, 0xFF);
        assert_eq!(mmu.if_reg, 0x1F);
        mmu.write(0xFF0F, 0x00);
        assert_eq!(mmu.read(0xFF0F), 0xE0);
    }

    #[test]
    fn unusable_region_reads_ff() {
        let mut mmu = mmu(false);
        mmu.write(0xFEA0, 0x12);
        assert_eq!(mmu.read(0xFEA0), 0xFF);
    }

    #[test]
    fn wram_bank_zero_selects_one() {
        let mut mmu = mmu(true);
        mmu.write(0xFF70, 0x00);
        mmu.write(0xD000, 0x11);
        mmu.write(0xFF70, 0x01);
        assert_eq!(mmu.read(0xD000), 0x11);
        mmu.write(0xFF70, 0x03);
        assert_eq!(mmu.read(0xD000), 0x00);
        assert_eq!(mmu.read(0xFF70), 0xFB);
    }

    #[test]
    fn oam_dma_copies_page() {
        let mut mmu = mmu(false);
        for i in 0..0xA0u16 {
            mmu.write(0xC000 + i, i as u8);
        }
        mmu.write(0xFF46, 0xC0);
        assert_eq!(mmu.read(0xFE00), 0x00);
        assert_eq!(mmu.read(0xFE9F), 0x9F);
    }

    #[test]
    fn general_hdma_copies_immediately() {
        let mut mmu = mmu(true);
        for i in 0..0x20u16 {
            mmu.write(0xC000 + i, 0x80 | i as u8);
        }
        mmu.write(0xFF51, 0xC0);
        mmu.write(0xFF52, 0x00);
        mmu.write(0xFF53, 0x01);
        mmu.write(0xFF54, 0x00);
        mmu.write(0xFF55, 0x01);
        assert_eq!(mmu.read(0x8100), 0x80);
        assert_eq!(mmu.read(0x811F), 0x9F);
        assert_eq!(mmu.read(0xFF55), 0xFF);
    }

    #[test]
    fn hblank_hdma_copies_one_block_per_line() {
        let mut mmu = mmu(true);
        for i in 0..0x20u16 {
            mmu.write(0xC000 + i, 0x40 | i as u8);
        }
        mmu.write(0xFF51, 0xC0);
        mmu.write(0xFF52, 0x00);
        mmu.write(0xFF53, 0x00);
        mmu.write(0xFF54, 0x00);
        mmu.write(0xFF55, 0x81);
        assert_eq!(mmu.read(0xFF55), 0x01);
        assert_eq!(mmu.read(0x8000), 0x00);

        // OAM scan + transfer ends the first line's drawing.
        mmu.step_video(80 + 172);
        assert_eq!(mmu.read(0x8000), 0x40);
        assert_eq!(mmu.read(0x8010), 0x00);
        assert_eq!(mmu.read(0xFF55), 0x00);

        mmu.step_video(204 + 80 + 172);
        assert_eq!(mmu.read(0x8010), 0x50);
        assert_eq!(mmu.read(0xFF55), 0xFF);
    }

    #[test]
    fn key1_arms_speed_switch_in_cgb_only() {
        let mut dmg = mmu(false);
        dmg.write(0xFF4D, 0x01);
        assert!(!dmg.try_speed_switch());
        assert_eq!(dmg.read(0xFF4D), 0xFF);

        let mut cgb = mmu(true);
        assert!(!cgb.try_speed_switch());
        cgb.write(0xFF4D, 0x01);
        assert_eq!(cgb.read(0xFF4D), 0x7F);
        assert!(cgb.try_speed_switch());
        assert!(cgb.double_speed());
        assert_eq!(cgb.speed_factor(), 2);
        assert_eq!(cgb.read(0xFF4D), 0xFE);
    }

    #[test]
    fn audio_writes_reach_engine_apu() {
        let mut mmu = mmu(false);
        mmu.write(0xFF24, 0x35);
        assert_eq!(mmu.read(0xFF24), 0x35);
        mmu.write(0xFF30, 0xAB);
        assert_eq!(mmu.read(0xFF30), 0xAB);
    }

    #[test]
    fn unclaimed_io_reads_back() {
        let mut mmu = mmu(false);
        mmu.write(0xFF7F, 0x5A);
        assert_eq!(mmu.read(0xFF7F), 0x5A);
    }
}
