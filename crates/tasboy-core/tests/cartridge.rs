mod common;

use common::RomBuilder;
use tasboy_core::cartridge::{Cartridge, CgbSupport, MbcType, RTC_CYCLES_PER_SECOND};

fn cart(cart_type: u8, ram_code: u8) -> Cartridge {
    common::init_logger();
    let rom = RomBuilder::new()
        .banks(8)
        .cart_type(cart_type)
        .ram_code(ram_code)
        .build();
    Cartridge::new(rom).unwrap()
}

fn check_ram_enable_cycle(mut cart: Cartridge, addr: u16, value: u8) {
    cart.write(0x0000, 0x0A);
    cart.write(addr, value);
    assert_eq!(cart.read(addr), value, "{:?}", cart.mbc_type());

    cart.write(0x0000, 0x00);
    assert_eq!(cart.read(addr), 0xFF, "{:?}", cart.mbc_type());
    cart.write(addr, value ^ 0x0F);

    cart.write(0x0000, 0x0A);
    assert_eq!(cart.read(addr), value, "{:?}", cart.mbc_type());
}

#[test]
fn ram_enable_write_read_disable_for_every_mbc() {
    check_ram_enable_cycle(cart(0x03, 0x03), 0xA123, 0x5A);
    check_ram_enable_cycle(cart(0x06, 0x00), 0xA005, 0x0B);
    check_ram_enable_cycle(cart(0x13, 0x03), 0xBFFF, 0xC3);
    check_ram_enable_cycle(cart(0x1B, 0x04), 0xA000, 0x99);
}

#[test]
fn mbc1_zero_bank_aliases() {
    let mut cart = cart(0x01, 0x00);
    for raw in [0x00u8, 0x20, 0x40, 0x60] {
        cart.write(0x2000, raw & 0x1F);
        cart.write(0x4000, raw >> 5);
        assert_eq!(cart.rom_bank(), raw as usize + 1, "raw bank {raw:#04X}");
    }
    cart.write(0x4000, 0x00);
    cart.write(0x2000, 0x03);
    assert_eq!(cart.read(0x4000), 3);
}

#[test]
fn mbc2_zero_bank_aliases() {
    let mut cart = cart(0x05, 0x00);
    cart.write(0x2100, 0x00);
    assert_eq!(cart.rom_bank(), 1);
    assert_eq!(cart.read(0x4000), 1);
    cart.write(0x2100, 0x06);
    assert_eq!(cart.read(0x4000), 6);
}

#[test]
fn mbc2_ram_is_nibbles_mirrored() {
    let mut cart = cart(0x06, 0x00);
    cart.write(0x0000, 0x0A);
    cart.write(0xA001, 0xF7);
    assert_eq!(cart.read(0xA001), 0x07);
    assert_eq!(cart.read(0xA201), 0x07);
    assert_eq!(cart.save_data().len(), 512);
}

#[test]
fn rom_bank_wraps_modulo_bank_count() {
    let mut cart = cart(0x19, 0x00);
    cart.write(0x2000, 0x0B);
    assert_eq!(cart.read(0x4000), 3);
}

#[test]
fn mbc5_bank_zero_is_mappable() {
    let mut cart = cart(0x19, 0x00);
    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 0);
}

#[test]
fn header_cgb_mode() {
    let support = |flag| {
        let rom = RomBuilder::new().cgb_flag(flag).build();
        Cartridge::new(rom).unwrap().cgb_support()
    };
    assert_eq!(support(0x80), CgbSupport::Dual);
    assert_eq!(support(0xC0), CgbSupport::CgbOnly);
    assert_eq!(support(0x00), CgbSupport::DmgOnly);
    assert_eq!(support(0x42), CgbSupport::DmgOnly);
}

#[test]
fn title_is_nul_trimmed() {
    assert_eq!(cart(0x00, 0x00).title, "TASBOY TEST");
}

#[test]
fn mbc3_end_to_end() {
    let mut cart = cart(0x13, 0x03);
    assert_eq!(cart.mbc_type(), MbcType::Mbc3);
    assert!(cart.is_battery_backed());

    cart.write(0x1000, 0x0A);
    cart.write(0xA010, 0x42);
    assert_eq!(cart.read(0xA010), 0x42);

    cart.write(0x3000, 0x05);
    assert_eq!(cart.rom_bank(), 5);
    assert_eq!(cart.read(0x4000), 5);

    cart.write(0x3000, 0x00);
    assert_eq!(cart.rom_bank(), 1);
}

#[test]
fn mbc3_rtc_counts_emulated_time_and_latches() {
    let mut cart = cart(0x10, 0x03);
    cart.write(0x0000, 0x0A);
    cart.write(0x4000, 0x08);
    cart.write(0xA000, 58);

    cart.step_rtc(RTC_CYCLES_PER_SECOND * 3);
    assert_eq!(cart.read(0xA000), 1);
    cart.write(0x4000, 0x09);
    assert_eq!(cart.read(0xA000), 1);

    // Latch, then let the live clock run on.
    cart.write(0x6000, 0x00);
    cart.step_rtc(RTC_CYCLES_PER_SECOND * 60);
    assert_eq!(cart.read(0xA000), 1);

    cart.write(0x6000, 0x01);
    assert_eq!(cart.read(0xA000), 2);
}

#[test]
fn mbc3_rtc_halt_stops_the_clock() {
    let mut cart = cart(0x10, 0x03);
    cart.write(0x0000, 0x0A);
    cart.write(0x4000, 0x0C);
    cart.write(0xA000, 0x40);
    cart.step_rtc(RTC_CYCLES_PER_SECOND * 10);
    cart.write(0x4000, 0x08);
    assert_eq!(cart.read(0xA000), 0);
}

#[test]
fn save_data_round_trip() {
    let mut original = cart(0x1B, 0x03);
    original.write(0x0000, 0x0A);
    for bank in 0..4u8 {
        original.write(0x4000, bank);
        original.write(0xA000, 0x10 + bank);
        original.write(0xBFFF, 0x20 + bank);
    }
    let data = original.save_data();

    let mut restored = cart(0x1B, 0x03);
    restored.load_save_data(&data);
    assert_eq!(restored.save_data(), data);
}

#[test]
fn rom_only_has_no_save_data() {
    let mut cart = cart(0x00, 0x00);
    assert!(cart.save_data().is_empty());
    cart.write(0xA000, 0x12);
    assert_eq!(cart.read(0xA000), 0xFF);
}

#[test]
fn unknown_controller_falls_back_to_mbc1() {
    assert_eq!(cart(0xFC, 0x00).mbc_type(), MbcType::Mbc1);
}
