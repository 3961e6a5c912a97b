/// Interrupt sources in priority order (lowest bit is serviced first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::LcdStat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    #[inline]
    pub const fn vector(self) -> u16 {
        0x40 + 8 * self as u16
    }

    /// Highest-priority interrupt in `pending`, if any.
    pub fn highest(pending: u8) -> Option<Interrupt> {
        Self::ALL.into_iter().find(|irq| pending & irq.bit() != 0)
    }
}

/// Set `irq`'s bit in an interrupt-request byte.
#[inline]
pub fn request(if_reg: &mut u8, irq: Interrupt) {
    *if_reg |= irq.bit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_and_bits() {
        assert_eq!(Interrupt::VBlank.vector(), 0x40);
        assert_eq!(Interrupt::LcdStat.vector(), 0x48);
        assert_eq!(Interrupt::Timer.vector(), 0x50);
        assert_eq!(Interrupt::Serial.vector(), 0x58);
        assert_eq!(Interrupt::Joypad.vector(), 0x60);
        assert_eq!(Interrupt::Joypad.bit(), 0x10);
    }

    #[test]
    fn vblank_wins_over_timer() {
        assert_eq!(Interrupt::highest(0x05), Some(Interrupt::VBlank));
        assert_eq!(Interrupt::highest(0x14), Some(Interrupt::Timer));
        assert_eq!(Interrupt::highest(0x00), None);
    }
}
