use serde::{Deserialize, Serialize};

use crate::interrupts::{self, Interrupt};

/// Joypad buttons in input-mask bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Joypad state: an active-low mask of held buttons plus the P1 line select bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    mask: u8,
    select: u8,
}

impl Input {
    pub fn new() -> Self {
        Self {
            mask: 0xFF,
            select: 0x00,
        }
    }

    /// Raw active-low mask. A cleared bit means the button is held.
    #[inline]
    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.mask & button.bit() == 0
    }

    pub fn press(&mut self, button: Button, if_reg: &mut u8) {
        self.mask &= !button.bit();
        interrupts::request(if_reg, Interrupt::Joypad);
    }

    pub fn release(&mut self, button: Button) {
        self.mask |= button.bit();
    }

    /// P1 read. Bit 4 selects the action nibble, bit 5 the direction nibble.
    pub fn read(&self) -> u8 {
        let nibble = if self.select & 0x10 != 0 {
            self.mask & 0x0F
        } else if self.select & 0x20 != 0 {
            (self.mask >> 4) & 0x0F
        } else {
            0x0F
        };
        self.select | 0xC0 | nibble
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::new()
    }
}
