use serde::{Deserialize, Serialize};

use crate::interrupts::{self, Interrupt};

/// Cycles accumulated before DIV advances by one.
pub const DIVIDER_THRESHOLD: u32 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    /// Divider register (FF04).
    pub div: u8,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    divider_acc: u32,
    counter: u32,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            divider_acc: 0,
            counter: 0,
        }
    }

    /// TIMA period in CPU cycles for the frequency selected by TAC.
    pub fn period(&self) -> u32 {
        match self.tac & 0x03 {
            0 => 1024,
            1 => 16,
            2 => 64,
            _ => 256,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => self.div,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => {
                self.div = 0;
                self.divider_acc = 0;
            }
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => {
                let old_period = self.period();
                self.tac = val & 0x07;
                if self.period() != old_period {
                    self.counter = 0;
                }
            }
            _ => {}
        }
    }

    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        self.divider_acc += cycles;
        if self.divider_acc >= DIVIDER_THRESHOLD {
            self.divider_acc -= DIVIDER_THRESHOLD;
            self.div = self.div.wrapping_add(1);
        }

        if !self.enabled() {
            return;
        }

        self.counter += cycles;
        let period = self.period();
        while self.counter >= period {
            self.counter -= period;
            if self.tima == 0xFF {
                self.tima = self.tma;
                interrupts::request(if_reg, Interrupt::Timer);
            } else {
                self.tima += 1;
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
