use std::{fmt, ops::Deref, sync::Arc};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, MIN_ROM_LEN};

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const MBC2_RAM_SIZE: usize = 0x200;

/// Cartridge types whose RAM is kept alive by a battery.
const BATTERY_TYPES: [u8; 11] = [
    0x03, 0x06, 0x09, 0x0D, 0x0F, 0x10, 0x13, 0x17, 0x1B, 0x1E, 0xFF,
];

/// Shared, read-only ROM image. Cloning only bumps a reference count.
#[derive(Clone)]
pub struct Rom(Arc<[u8]>);

impl fmt::Debug for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rom({} bytes)", self.0.len())
    }
}

impl Rom {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self(data.into())
    }

    pub fn shares_with(&self, other: &Rom) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Rom {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl Deref for Rom {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Hardware modes a cartridge declares support for (header byte 0x143).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CgbSupport {
    DmgOnly,
    Dual,
    CgbOnly,
}

impl CgbSupport {
    pub fn from_header(byte: u8) -> Self {
        match byte {
            0x80 => CgbSupport::Dual,
            0xC0 => CgbSupport::CgbOnly,
            _ => CgbSupport::DmgOnly,
        }
    }

    pub fn supports_cgb(self) -> bool {
        !matches!(self, CgbSupport::DmgOnly)
    }

    pub fn supports_dmg(self) -> bool {
        !matches!(self, CgbSupport::CgbOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbcType {
    RomOnly,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

impl MbcType {
    /// Controller for a header cartridge-type byte. Unsupported mappers run as MBC1.
    pub fn from_cart_type(cart_type: u8) -> Self {
        match cart_type {
            0x00 | 0x08 | 0x09 | 0x0B | 0x0C | 0x0D => MbcType::RomOnly,
            0x01..=0x03 => MbcType::Mbc1,
            0x04..=0x06 => MbcType::Mbc2,
            0x07..=0x13 => MbcType::Mbc3,
            0x14..=0x16 => {
                warn!("MBC4 cartridge (type {cart_type:#04X}) is unsupported, running as MBC1");
                MbcType::Mbc1
            }
            0x17..=0x1E => MbcType::Mbc5,
            _ => {
                warn!("unsupported cartridge type {cart_type:#04X}, running as MBC1");
                MbcType::Mbc1
            }
        }
    }
}

/// Read-only view of the cartridge header.
pub struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        if data.len() < MIN_ROM_LEN {
            return Err(LoadError::HeaderTooShort(data.len()));
        }
        Ok(Self { data })
    }

    pub fn title(&self) -> String {
        let slice = &self.data[0x0134..0x0143];
        let title: String = slice
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        title.trim().to_string()
    }

    pub fn cgb_support(&self) -> CgbSupport {
        CgbSupport::from_header(self.data[0x0143])
    }

    pub fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    pub fn mbc_type(&self) -> MbcType {
        MbcType::from_cart_type(self.cart_type())
    }

    pub fn is_battery_backed(&self) -> bool {
        BATTERY_TYPES.contains(&self.cart_type())
    }

    pub fn global_checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[0x014E], self.data[0x014F]])
    }

    /// External RAM size for the controller `mbc` resolved from this header.
    pub fn ram_size(&self, mbc: MbcType) -> usize {
        match mbc {
            MbcType::RomOnly => return 0,
            // MBC2 has 512x4-bit internal RAM regardless of header RAM size.
            MbcType::Mbc2 => return MBC2_RAM_SIZE,
            _ => {}
        }

        match self.data[0x0149] {
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            // Banked controllers always get at least one RAM bank to address.
            _ => RAM_BANK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RtcRegisters {
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    halt: bool,
    carry: bool,
}

impl RtcRegisters {
    fn control_byte(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }

    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds & 0x3F,
            0x09 => self.minutes & 0x3F,
            0x0A => self.hours & 0x1F,
            0x0B => (self.days & 0x00FF) as u8,
            0x0C => self.control_byte(),
            _ => 0xFF,
        }
    }
}

pub const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

/// MBC3 real-time clock.
///
/// The clock advances with emulated CPU cycles only, so two runs fed the same
/// inputs observe the same time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Rtc {
    live: RtcRegisters,
    latched_regs: RtcRegisters,
    latched: bool,
    subsecond_cycles: u32,
}

impl Rtc {
    fn read(&self, reg: u8) -> u8 {
        if self.latched {
            self.latched_regs.read(reg)
        } else {
            self.live.read(reg)
        }
    }

    fn write(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => {
                self.live.seconds = value & 0x3F;
                self.subsecond_cycles = 0;
            }
            0x09 => self.live.minutes = value & 0x3F,
            0x0A => self.live.hours = value & 0x1F,
            0x0B => self.live.days = (self.live.days & 0x0100) | value as u16,
            0x0C => {
                self.live.days = (self.live.days & 0x00FF) | (((value & 0x01) as u16) << 8);
                self.live.halt = value & 0x40 != 0;
                self.live.carry = value & 0x80 != 0;
            }
            _ => {}
        }
    }

    fn latch(&mut self) {
        self.latched = true;
        self.latched_regs = self.live;
    }

    fn unlatch(&mut self) {
        self.latched = false;
    }

    fn step(&mut self, cycles: u32) {
        if self.live.halt {
            return;
        }

        self.subsecond_cycles += cycles;
        while self.subsecond_cycles >= RTC_CYCLES_PER_SECOND {
            self.subsecond_cycles -= RTC_CYCLES_PER_SECOND;
            self.second_tick();
        }
    }

    // Registers holding out-of-range values keep counting until they wrap at
    // their bit width, matching hardware.
    fn second_tick(&mut self) {
        if self.live.seconds == 59 {
            self.live.seconds = 0;
            self.minute_tick();
        } else {
            self.live.seconds = (self.live.seconds + 1) & 0x3F;
        }
    }

    fn minute_tick(&mut self) {
        if self.live.minutes == 59 {
            self.live.minutes = 0;
            self.hour_tick();
        } else {
            self.live.minutes = (self.live.minutes + 1) & 0x3F;
        }
    }

    fn hour_tick(&mut self) {
        if self.live.hours == 23 {
            self.live.hours = 0;
            self.day_tick();
        } else {
            self.live.hours = (self.live.hours + 1) & 0x1F;
        }
    }

    fn day_tick(&mut self) {
        if self.live.days >= 0x01FF {
            self.live.days = 0;
            self.live.carry = true;
        } else {
            self.live.days += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum BankController {
    RomOnly,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        rom_banking: bool,
        ram_enabled: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enabled: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enabled: bool,
        rtc: Rtc,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enabled: bool,
    },
}

impl BankController {
    fn new(mbc: MbcType) -> Self {
        match mbc {
            MbcType::RomOnly => BankController::RomOnly,
            MbcType::Mbc1 => BankController::Mbc1 {
                rom_bank: 1,
                ram_bank: 0,
                rom_banking: true,
                ram_enabled: false,
            },
            MbcType::Mbc2 => BankController::Mbc2 {
                rom_bank: 1,
                ram_enabled: false,
            },
            MbcType::Mbc3 => BankController::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enabled: false,
                rtc: Rtc::default(),
            },
            MbcType::Mbc5 => BankController::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enabled: false,
            },
        }
    }

    fn mbc_type(&self) -> MbcType {
        match self {
            BankController::RomOnly => MbcType::RomOnly,
            BankController::Mbc1 { .. } => MbcType::Mbc1,
            BankController::Mbc2 { .. } => MbcType::Mbc2,
            BankController::Mbc3 { .. } => MbcType::Mbc3,
            BankController::Mbc5 { .. } => MbcType::Mbc5,
        }
    }

    fn rom_bank(&self) -> usize {
        match self {
            BankController::RomOnly => 1,
            BankController::Mbc1 { rom_bank, .. }
            | BankController::Mbc2 { rom_bank, .. }
            | BankController::Mbc3 { rom_bank, .. } => *rom_bank as usize,
            BankController::Mbc5 { rom_bank, .. } => *rom_bank as usize,
        }
    }
}

/// MBC1 and MBC2 cannot map bank 0 (or its MBC1 aliases) into the switchable window.
fn skip_zero_bank(bank: u8) -> u8 {
    match bank {
        0x00 | 0x20 | 0x40 | 0x60 => bank + 1,
        _ => bank,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cartridge {
    #[serde(skip)]
    rom: Rom,
    ram: Vec<u8>,
    controller: BankController,
    pub title: String,
    cgb_support: CgbSupport,
    cart_type: u8,
}

impl Cartridge {
    pub fn new(rom: impl Into<Arc<[u8]>>) -> Result<Self, LoadError> {
        let rom = Rom::new(rom);
        let header = Header::parse(&rom)?;
        let mbc = header.mbc_type();
        let title = header.title();
        let cgb_support = header.cgb_support();
        let cart_type = header.cart_type();
        let ram = vec![0; header.ram_size(mbc)];

        info!(
            "loaded cartridge \"{title}\": type {cart_type:#04X} ({mbc:?}), {} KiB ROM, {} KiB RAM",
            rom.len() / 1024,
            ram.len() / 1024
        );

        Ok(Self {
            controller: BankController::new(mbc),
            rom,
            ram,
            title,
            cgb_support,
            cart_type,
        })
    }

    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    /// Reattach the ROM image after the cartridge state was restored from disk.
    pub(crate) fn attach_rom(&mut self, rom: Rom) {
        self.rom = rom;
    }

    pub fn mbc_type(&self) -> MbcType {
        self.controller.mbc_type()
    }

    pub fn cgb_support(&self) -> CgbSupport {
        self.cgb_support
    }

    pub fn cart_type(&self) -> u8 {
        self.cart_type
    }

    pub fn is_battery_backed(&self) -> bool {
        BATTERY_TYPES.contains(&self.cart_type)
    }

    /// Bank currently mapped at 0x4000-0x7FFF.
    pub fn rom_bank(&self) -> usize {
        self.controller.rom_bank()
    }

    pub fn ram_enabled(&self) -> bool {
        match &self.controller {
            BankController::RomOnly => false,
            BankController::Mbc1 { ram_enabled, .. }
            | BankController::Mbc2 { ram_enabled, .. }
            | BankController::Mbc3 { ram_enabled, .. }
            | BankController::Mbc5 { ram_enabled, .. } => *ram_enabled,
        }
    }

    fn rom_byte(&self, bank: usize, offset: usize) -> u8 {
        let bank_count = (self.rom.len() / ROM_BANK_SIZE).max(1);
        let bank = bank % bank_count;
        self.rom
            .get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_index(&self, bank: u8, addr: u16) -> Option<usize> {
        if self.ram.is_empty() {
            return None;
        }
        let idx = bank as usize * RAM_BANK_SIZE + (addr as usize - 0xA000);
        Some(idx % self.ram.len())
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.controller, addr) {
            (_, 0x0000..=0x3FFF) => self.rom_byte(0, addr as usize),
            (controller, 0x4000..=0x7FFF) => {
                self.rom_byte(controller.rom_bank(), addr as usize - ROM_BANK_SIZE)
            }
            (BankController::RomOnly, _) => 0xFF,
            (BankController::Mbc2 { ram_enabled, .. }, 0xA000..=0xBFFF) => {
                if !*ram_enabled {
                    return 0xFF;
                }
                self.ram[(addr as usize - 0xA000) & (MBC2_RAM_SIZE - 1)] & 0x0F
            }
            (
                BankController::Mbc3 {
                    ram_bank,
                    ram_enabled,
                    rtc,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if !*ram_enabled {
                    0xFF
                } else if *ram_bank >= 0x04 {
                    rtc.read(*ram_bank)
                } else {
                    self.read_ram(*ram_bank, addr)
                }
            }
            (
                BankController::Mbc1 {
                    ram_bank,
                    ram_enabled,
                    ..
                }
                | BankController::Mbc5 {
                    ram_bank,
                    ram_enabled,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if *ram_enabled {
                    self.read_ram(*ram_bank, addr)
                } else {
                    0xFF
                }
            }
            _ => 0xFF,
        }
    }

    fn read_ram(&self, bank: u8, addr: u16) -> u8 {
        self.ram_index(bank, addr)
            .map(|idx| self.ram[idx])
            .unwrap_or(0xFF)
    }

    fn write_ram(&mut self, bank: u8, addr: u16, val: u8) {
        if let Some(idx) = self.ram_index(bank, addr) {
            self.ram[idx] = val;
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.write_control(addr, val),
            0xA000..=0xBFFF => self.write_external(addr, val),
            _ => {}
        }
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match (&mut self.controller, addr) {
            (BankController::RomOnly, _) => {}
            (
                BankController::Mbc1 { ram_enabled, .. } | BankController::Mbc5 { ram_enabled, .. },
                0x0000..=0x1FFF,
            ) => match val & 0x0F {
                0x0A => *ram_enabled = true,
                0x00 => *ram_enabled = false,
                _ => {}
            },
            (BankController::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = skip_zero_bank((*rom_bank & 0x60) | (val & 0x1F));
            }
            (
                BankController::Mbc1 {
                    rom_bank,
                    ram_bank,
                    rom_banking,
                    ..
                },
                0x4000..=0x5FFF,
            ) => {
                if *rom_banking {
                    *rom_bank = skip_zero_bank((*rom_bank & 0x1F) | ((val & 0x03) << 5));
                } else {
                    *ram_bank = val & 0x03;
                }
            }
            (
                BankController::Mbc1 {
                    rom_bank,
                    ram_bank,
                    rom_banking,
                    ..
                },
                0x6000..=0x7FFF,
            ) => {
                *rom_banking = val & 0x01 == 0;
                if *rom_banking {
                    *ram_bank = 0;
                } else {
                    *rom_bank = skip_zero_bank(*rom_bank & 0x1F);
                }
                debug!("MBC1 banking mode: rom_banking={rom_banking}");
            }
            (BankController::Mbc2 { ram_enabled, .. }, 0x0000..=0x1FFF) => {
                if addr & 0x0100 == 0 {
                    match val & 0x0F {
                        0x0A => *ram_enabled = true,
                        0x00 => *ram_enabled = false,
                        _ => {}
                    }
                }
            }
            (BankController::Mbc2 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                if addr & 0x0100 != 0 {
                    *rom_bank = skip_zero_bank(val & 0x0F);
                }
            }
            (BankController::Mbc2 { .. }, _) => {}
            (BankController::Mbc3 { ram_enabled, .. }, 0x0000..=0x1FFF) => {
                *ram_enabled = val & 0x0A != 0;
            }
            (BankController::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = match val & 0x7F {
                    0 => 1,
                    bank => bank,
                };
            }
            (BankController::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            (BankController::Mbc3 { rtc, .. }, 0x6000..=0x7FFF) => match val {
                0x00 => rtc.latch(),
                0x01 => rtc.unlatch(),
                _ => {}
            },
            (BankController::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                *rom_bank = (*rom_bank & 0x100) | val as u16;
            }
            (BankController::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                *rom_bank = (*rom_bank & 0x0FF) | (((val & 0x01) as u16) << 8);
            }
            (BankController::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            (BankController::Mbc5 { .. }, _) => {}
            _ => {}
        }
    }

    fn write_external(&mut self, addr: u16, val: u8) {
        match &mut self.controller {
            BankController::RomOnly => {}
            BankController::Mbc2 { ram_enabled, .. } => {
                if *ram_enabled {
                    self.ram[(addr as usize - 0xA000) & (MBC2_RAM_SIZE - 1)] = val & 0x0F;
                }
            }
            BankController::Mbc3 {
                ram_bank,
                ram_enabled,
                rtc,
                ..
            } => {
                if !*ram_enabled {
                    return;
                }
                if *ram_bank >= 0x04 {
                    rtc.write(*ram_bank, val);
                } else {
                    let bank = *ram_bank;
                    self.write_ram(bank, addr, val);
                }
            }
            BankController::Mbc1 {
                ram_bank,
                ram_enabled,
                ..
            }
            | BankController::Mbc5 {
                ram_bank,
                ram_enabled,
                ..
            } => {
                if *ram_enabled {
                    let bank = *ram_bank;
                    self.write_ram(bank, addr, val);
                }
            }
        }
    }

    /// Advance the MBC3 clock by `cycles` CPU cycles.
    pub fn step_rtc(&mut self, cycles: u32) {
        if let BankController::Mbc3 { rtc, .. } = &mut self.controller {
            rtc.step(cycles);
        }
    }

    /// Copy of the battery-backed RAM. Empty for ROM-only carts.
    pub fn save_data(&self) -> Vec<u8> {
        match self.controller {
            BankController::RomOnly => Vec::new(),
            _ => self.ram.clone(),
        }
    }

    /// Load battery-backed RAM. Extra bytes are ignored and missing bytes keep their value.
    pub fn load_save_data(&mut self, data: &[u8]) {
        if matches!(self.controller, BankController::RomOnly) {
            return;
        }
        if data.len() != self.ram.len() {
            warn!(
                "save data is {} bytes but cartridge RAM is {} bytes",
                data.len(),
                self.ram.len()
            );
        }
        let n = data.len().min(self.ram.len());
        self.ram[..n].copy_from_slice(&data[..n]);
    }
}
