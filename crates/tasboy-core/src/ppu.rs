use serde::{Deserialize, Serialize};

use crate::interrupts::{self, Interrupt};
use crate::palette::{self, CgbPalette, DMG_SHADES, Rgb};

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

// Timing constants per LCD mode in T-cycles
pub const SCANLINE_CYCLES: u16 = 456;
const MODE0_CYCLES: u16 = 204; // HBlank
const MODE2_CYCLES: u16 = 80; // OAM scan
const MODE3_CYCLES: u16 = 172; // Pixel transfer

// Lines 144..=153 are VBlank
const LAST_LINE: u8 = 153;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
const VRAM_BANK_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

// VRAM layout constants
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_0_BASE: usize = 0x0000;
const TILE_DATA_1_BASE: usize = 0x0800;

// LCD modes used in the `mode` field
const MODE_HBLANK: u8 = 0;
const MODE_VBLANK: u8 = 1;
const MODE_OAM: u8 = 2;
const MODE_TRANSFER: u8 = 3;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ppu {
    vram: Vec<u8>,
    vram_bank: usize,
    #[serde(with = "crate::byte_array")]
    oam: [u8; OAM_SIZE],

    cgb: bool,

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    dma: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    /// Internal window line counter
    win_line_counter: u8,

    bg_palette: CgbPalette,
    obj_palette: CgbPalette,

    mode_clock: u16,
    mode: u8,

    /// Frame currently being drawn.
    screen: Vec<Rgb>,
    /// Last completed frame, the one exposed to the host.
    prepared: Vec<Rgb>,
    /// CGB BG-to-OBJ priority attribute of every background pixel this frame.
    bg_priority: Vec<bool>,
    /// Raw background colour index of each pixel on the current line.
    #[serde(with = "crate::byte_array")]
    tile_scanline: [u8; SCREEN_WIDTH],
    /// Latched sprites for the current scanline
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    stat_irq_line: bool,
    frame_count: u64,
    /// Debug layer switches. Not hardware state.
    hide_background: bool,
    hide_sprites: bool,
}

impl Ppu {
    pub fn new(cgb: bool) -> Self {
        Self {
            vram: vec![0; VRAM_BANK_SIZE * 2],
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            cgb,
            lcdc: 0x91,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            dma: 0xFF,
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            wy: 0,
            wx: 0,
            win_line_counter: 0,
            bg_palette: CgbPalette::new(),
            obj_palette: CgbPalette::new(),
            mode_clock: 0,
            mode: MODE_OAM,
            screen: vec![DMG_SHADES[3]; SCREEN_WIDTH * SCREEN_HEIGHT],
            prepared: vec![DMG_SHADES[3]; SCREEN_WIDTH * SCREEN_HEIGHT],
            bg_priority: vec![false; SCREEN_WIDTH * SCREEN_HEIGHT],
            tile_scanline: [0; SCREEN_WIDTH],
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            stat_irq_line: false,
            frame_count: 0,
            hide_background: false,
            hide_sprites: false,
        }
    }

    /// Skip the background and window when drawing. Sprites then see a
    /// transparent background.
    pub fn set_hide_background(&mut self, hide: bool) {
        self.hide_background = hide;
    }

    pub fn set_hide_sprites(&mut self, hide: bool) {
        self.hide_sprites = hide;
    }

    pub fn hide_background(&self) -> bool {
        self.hide_background
    }

    pub fn hide_sprites(&self) -> bool {
        self.hide_sprites
    }

    /// Last completed frame in row-major order.
    pub fn framebuffer(&self) -> &[Rgb] {
        &self.prepared
    }

    pub fn frames(&self) -> u64 {
        self.frame_count
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn in_hblank(&self) -> bool {
        self.mode == MODE_HBLANK
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        self.vram[self.vram_bank * VRAM_BANK_SIZE + (addr as usize & 0x1FFF)]
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        self.vram[self.vram_bank * VRAM_BANK_SIZE + (addr as usize & 0x1FFF)] = val;
    }

    pub fn read_oam(&self, addr: u16) -> u8 {
        self.oam
            .get(addr as usize - 0xFE00)
            .copied()
            .unwrap_or(0xFF)
    }

    pub fn write_oam(&mut self, addr: u16, val: u8) {
        if let Some(b) = self.oam.get_mut(addr as usize - 0xFE00) {
            *b = val;
        }
    }

    #[inline]
    fn vram_at(&self, bank: usize, offset: usize) -> u8 {
        self.vram[bank * VRAM_BANK_SIZE + offset]
    }

    fn lyc_eq_ly(&self) -> bool {
        self.ly == self.lyc
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let coincidence = if self.lcd_enabled() && self.lyc_eq_ly() {
                    0x04
                } else {
                    0
                };
                (self.stat & 0x78) | 0x80 | coincidence | (self.mode & 0x03)
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF46 => self.dma,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF4F if self.cgb => 0xFE | self.vram_bank as u8,
            0xFF68 if self.cgb => self.bg_palette.read_index(),
            0xFF69 if self.cgb => self.bg_palette.read_data(),
            0xFF6A if self.cgb => self.obj_palette.read_index(),
            0xFF6B if self.cgb => self.obj_palette.read_data(),
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                if was_on && !self.lcd_enabled() {
                    self.mode = MODE_HBLANK;
                    self.mode_clock = 0;
                    self.win_line_counter = 0;
                    self.ly = 0;
                    self.prepared.fill(DMG_SHADES[0]);
                } else if !was_on && self.lcd_enabled() {
                    self.mode = MODE_OAM;
                    self.mode_clock = 0;
                }
            }
            0xFF41 => self.stat = (self.stat & 0x07) | (val & 0x78),
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            // Writing LY resets the line counter.
            0xFF44 => {
                self.ly = 0;
                self.mode_clock = 0;
                self.mode = MODE_OAM;
            }
            0xFF45 => self.lyc = val,
            0xFF46 => self.dma = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF4F if self.cgb => self.vram_bank = (val & 0x01) as usize,
            0xFF68 if self.cgb => self.bg_palette.write_index(val),
            0xFF69 if self.cgb => self.bg_palette.write_data(val),
            0xFF6A if self.cgb => self.obj_palette.write_index(val),
            0xFF6B if self.cgb => self.obj_palette.write_data(val),
            _ => {}
        }
    }

    fn oam_scan(&mut self) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        self.sprite_count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.sprite_count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if self.ly as i16 >= y && (self.ly as i16) < y + sprite_height {
                self.line_sprites[self.sprite_count] = Sprite {
                    x: self.oam[base + 1] as i16 - 8,
                    y,
                    tile: self.oam[base + 2],
                    flags: self.oam[base + 3],
                    oam_index: i,
                };
                self.sprite_count += 1;
            }
        }
        if self.cgb {
            self.line_sprites[..self.sprite_count].sort_by_key(|s| s.oam_index);
        } else {
            self.line_sprites[..self.sprite_count].sort_by_key(|s| (s.x, s.oam_index));
        }
    }

    /// Colour index and CGB attributes of the map pixel at (`map_x`, `map_y`).
    fn tile_pixel(&self, map_base: usize, map_x: usize, map_y: usize) -> (u8, u8) {
        let map_offset = map_base + (map_y / 8) * 32 + map_x / 8;
        let tile_index = self.vram_at(0, map_offset);
        let attr = if self.cgb {
            self.vram_at(1, map_offset)
        } else {
            0
        };

        let addr = if self.lcdc & 0x10 != 0 {
            TILE_DATA_0_BASE + tile_index as usize * 16
        } else {
            TILE_DATA_1_BASE + ((tile_index as i8 as i16 + 128) as usize) * 16
        };
        let mut tile_y = map_y % 8;
        if attr & 0x40 != 0 {
            tile_y = 7 - tile_y;
        }
        let bit = if attr & 0x20 != 0 {
            map_x % 8
        } else {
            7 - map_x % 8
        };
        let bank = ((attr >> 3) & 0x01) as usize;
        let lo = self.vram_at(bank, addr + tile_y * 2);
        let hi = self.vram_at(bank, addr + tile_y * 2 + 1);
        (((hi >> bit) & 1) << 1 | ((lo >> bit) & 1), attr)
    }

    fn put_background_pixel(&mut self, x: usize, color_id: u8, attr: u8) {
        let row = self.ly as usize * SCREEN_WIDTH;
        self.screen[row + x] = if self.cgb {
            self.bg_palette.colour(attr & 0x07, color_id)
        } else {
            palette::dmg_shade(self.bgp, color_id)
        };
        self.bg_priority[row + x] = attr & 0x80 != 0;
        self.tile_scanline[x] = color_id;
    }

    fn render_scanline(&mut self) {
        if !self.lcd_enabled() || self.ly as usize >= SCREEN_HEIGHT {
            return;
        }

        let row = self.ly as usize * SCREEN_WIDTH;
        let bg_enabled = self.cgb || self.lcdc & 0x01 != 0;
        let master_priority = !self.cgb || self.lcdc & 0x01 != 0;

        // DMG with the background off shows colour 0 and sprites see it as transparent.
        let blank = if self.cgb {
            self.bg_palette.colour(0, 0)
        } else {
            palette::dmg_shade(self.bgp, 0)
        };
        self.screen[row..row + SCREEN_WIDTH].fill(blank);
        self.bg_priority[row..row + SCREEN_WIDTH].fill(false);
        self.tile_scanline.fill(0);

        if bg_enabled && !self.hide_background {
            let bg_map = if self.lcdc & 0x08 != 0 {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            let map_y = (self.ly as usize + self.scy as usize) & 0xFF;
            for x in 0..SCREEN_WIDTH {
                let map_x = (x + self.scx as usize) & 0xFF;
                let (color_id, attr) = self.tile_pixel(bg_map, map_x, map_y);
                self.put_background_pixel(x, color_id, attr);
            }

            if self.lcdc & 0x20 != 0 && self.ly >= self.wy && self.wx <= WINDOW_X_MAX {
                let win_map = if self.lcdc & 0x40 != 0 {
                    BG_MAP_1_BASE
                } else {
                    BG_MAP_0_BASE
                };
                let start = self.wx as isize - 7;
                let window_y = self.win_line_counter as usize;
                for x in start.max(0) as usize..SCREEN_WIDTH {
                    let window_x = (x as isize - start) as usize;
                    let (color_id, attr) = self.tile_pixel(win_map, window_x, window_y);
                    self.put_background_pixel(x, color_id, attr);
                }
                self.win_line_counter = self.win_line_counter.wrapping_add(1);
            }
        }

        if self.lcdc & 0x02 == 0 || self.hide_sprites {
            return;
        }

        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let mut drawn = [false; SCREEN_WIDTH];
        for s in self.line_sprites[..self.sprite_count].iter().copied() {
            let mut tile = s.tile;
            if sprite_height == 16 {
                tile &= 0xFE;
            }
            let mut line_idx = self.ly as i16 - s.y;
            if s.flags & 0x40 != 0 {
                line_idx = sprite_height - 1 - line_idx;
            }
            let bank = if self.cgb {
                ((s.flags >> 3) & 0x01) as usize
            } else {
                0
            };
            let addr = tile as usize * 16 + line_idx as usize * 2;
            let lo = self.vram_at(bank, addr);
            let hi = self.vram_at(bank, addr + 1);
            for px in 0..8u8 {
                let bit = if s.flags & 0x20 != 0 { px } else { 7 - px };
                let color_id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
                if color_id == 0 {
                    continue;
                }
                let sx = s.x + px as i16;
                if !(0i16..SCREEN_WIDTH as i16).contains(&sx) || drawn[sx as usize] {
                    continue;
                }
                let sx = sx as usize;
                // A higher-priority opaque pixel wins even when the BG hides it.
                drawn[sx] = true;
                let bg_zero = !bg_enabled || self.tile_scanline[sx] == 0;
                if master_priority {
                    if self.cgb && self.bg_priority[row + sx] && !bg_zero {
                        continue;
                    }
                    if s.flags & 0x80 != 0 && !bg_zero {
                        continue;
                    }
                }
                self.screen[row + sx] = if self.cgb {
                    self.obj_palette.colour(s.flags & 0x07, color_id)
                } else if s.flags & 0x10 != 0 {
                    palette::dmg_shade(self.obp1, color_id)
                } else {
                    palette::dmg_shade(self.obp0, color_id)
                };
            }
        }
    }

    fn finish_frame(&mut self) {
        std::mem::swap(&mut self.screen, &mut self.prepared);
        self.bg_priority.fill(false);
        self.frame_count = self.frame_count.wrapping_add(1);
        #[cfg(feature = "ppu-trace")]
        log::trace!("frame {} complete", self.frame_count);
    }

    /// Advance by `cycles` dots. Returns true if H-blank was entered.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) -> bool {
        if !self.lcd_enabled() {
            return false;
        }

        let mut remaining = cycles;
        let mut hblank_entered = false;
        while remaining > 0 {
            let increment = remaining.min(4) as u16;
            remaining -= increment as u32;
            self.mode_clock += increment;

            match self.mode {
                MODE_OAM => {
                    if self.mode_clock >= MODE2_CYCLES {
                        self.mode_clock -= MODE2_CYCLES;
                        self.oam_scan();
                        self.mode = MODE_TRANSFER;
                    }
                }
                MODE_TRANSFER => {
                    if self.mode_clock >= MODE3_CYCLES {
                        self.mode_clock -= MODE3_CYCLES;
                        self.render_scanline();
                        self.mode = MODE_HBLANK;
                        hblank_entered = true;
                    }
                }
                MODE_HBLANK => {
                    if self.mode_clock >= MODE0_CYCLES {
                        self.mode_clock -= MODE0_CYCLES;
                        self.ly += 1;
                        if self.ly as usize == SCREEN_HEIGHT {
                            self.mode = MODE_VBLANK;
                            interrupts::request(if_reg, Interrupt::VBlank);
                        } else {
                            self.mode = MODE_OAM;
                        }
                    }
                }
                MODE_VBLANK => {
                    if self.mode_clock >= SCANLINE_CYCLES {
                        self.mode_clock -= SCANLINE_CYCLES;
                        if self.ly == LAST_LINE {
                            self.ly = 0;
                            self.win_line_counter = 0;
                            self.mode = MODE_OAM;
                            self.finish_frame();
                        } else {
                            self.ly += 1;
                        }
                    }
                }
                _ => unreachable!("invalid LCD mode {}", self.mode),
            }

            self.update_stat_irq(if_reg);
        }
        hblank_entered
    }

    fn update_stat_irq(&mut self, if_reg: &mut u8) {
        let coincidence = self.lyc_eq_ly() && self.stat & 0x40 != 0;
        let mode_signal = match self.mode {
            MODE_HBLANK => self.stat & 0x08 != 0,
            MODE_VBLANK => self.stat & 0x10 != 0,
            MODE_OAM => self.stat & 0x20 != 0,
            _ => false,
        };
        let line = coincidence || mode_signal;
        if line && !self.stat_irq_line {
            interrupts::request(if_reg, Interrupt::LcdStat);
        }
        self.stat_irq_line = line;
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(false)
    }
}
