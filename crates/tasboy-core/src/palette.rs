use serde::{Deserialize, Serialize};

pub type Rgb = [u8; 3];

/// DMG shades, lightest first.
pub const DMG_SHADES: [Rgb; 4] = [
    [0xE0, 0xF8, 0xD0],
    [0x88, 0xC0, 0x70],
    [0x34, 0x68, 0x56],
    [0x08, 0x18, 0x20],
];

/// 5-bit CGB channel to 8-bit output.
const CHANNEL_LEVELS: [u8; 32] = [
    0x00, 0x08, 0x10, 0x18, 0x20, 0x29, 0x31, 0x39, 0x41, 0x4A, 0x52, 0x5A, 0x62, 0x6A, 0x73, 0x7B,
    0x83, 0x8B, 0x94, 0x9C, 0xA4, 0xAC, 0xB4, 0xBD, 0xC5, 0xCD, 0xD5, 0xDE, 0xE6, 0xEE, 0xF6, 0xFF,
];

const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

/// Shade of `color_id` through a DMG palette register (BGP/OBP0/OBP1).
#[inline(always)]
pub fn dmg_shade(palette: u8, color_id: u8) -> Rgb {
    DMG_SHADES[((palette >> (color_id * 2)) & 0x03) as usize]
}

/// One CGB palette memory (background or object) with its index register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgbPalette {
    #[serde(with = "crate::byte_array")]
    data: [u8; PAL_RAM_SIZE],
    index: u8,
    auto_increment: bool,
}

impl CgbPalette {
    pub fn new() -> Self {
        Self {
            data: [0xFF; PAL_RAM_SIZE],
            index: 0,
            auto_increment: false,
        }
    }

    pub fn read_index(&self) -> u8 {
        let auto = if self.auto_increment {
            PAL_AUTO_INCREMENT_BIT
        } else {
            0
        };
        auto | 0x40 | self.index
    }

    pub fn write_index(&mut self, val: u8) {
        self.index = val & PAL_INDEX_MASK;
        self.auto_increment = val & PAL_AUTO_INCREMENT_BIT != 0;
    }

    pub fn read_data(&self) -> u8 {
        self.data[self.index as usize]
    }

    pub fn write_data(&mut self, val: u8) {
        self.data[self.index as usize] = val;
        if self.auto_increment {
            self.index = (self.index + 1) & PAL_INDEX_MASK;
        }
    }

    /// RGB colour `num` (0-3) of palette `palette` (0-7).
    pub fn colour(&self, palette: u8, num: u8) -> Rgb {
        let idx = (palette as usize & 0x07) * 8 + (num as usize & 0x03) * 2;
        let raw = u16::from_le_bytes([self.data[idx], self.data[idx + 1]]);
        [
            CHANNEL_LEVELS[(raw & 0x1F) as usize],
            CHANNEL_LEVELS[((raw >> 5) & 0x1F) as usize],
            CHANNEL_LEVELS[((raw >> 10) & 0x1F) as usize],
        ]
    }
}

impl Default for CgbPalette {
    fn default() -> Self {
        Self::new()
    }
}
