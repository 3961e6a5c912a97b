mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::RomBuilder;
use tasboy_core::{EngineOptions, GameBoy, audio_queue::audio_queue};

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn disabled_sound_starts_no_sampler() {
    common::init_logger();
    let options = EngineOptions {
        sound_enabled: false,
        ..EngineOptions::default()
    };
    let mut gb = GameBoy::new(RomBuilder::new().build(), options).unwrap();
    let (tx, _rx) = audio_queue(1024);
    assert!(gb.attach_audio(tx).unwrap().is_none());
}

/// Square 2 at full volume routed to both sides, then spin.
fn square_tone_rom() -> Vec<u8> {
    let program = [
        0x3E, 0x22, 0xE0, 0x25, // NR51
        0x3E, 0xF0, 0xE0, 0x17, // NR22
        0x3E, 0x00, 0xE0, 0x18, // NR23
        0x3E, 0x86, 0xE0, 0x19, // NR24: trigger
        0x18, 0xFE, // JR -2
    ];
    RomBuilder::new().program(&program).build()
}

#[test]
fn program_audio_writes_reach_the_sampler() {
    common::init_logger();
    let mut gb = GameBoy::new(square_tone_rom(), EngineOptions::default()).unwrap();
    let (tx, rx) = audio_queue(8192);
    let sampler = gb.attach_audio(tx).unwrap().expect("sound is enabled");

    assert!(wait_for(|| !rx.is_empty()));
    while rx.pop().is_some() {}

    gb.update();
    let mut heard = false;
    assert!(wait_for(|| {
        while let Some((l, r)) = rx.pop() {
            heard |= l != 0 && r != 0;
        }
        heard
    }));
    drop(sampler);
}

#[test]
fn snapshot_copies_do_not_feed_the_sampler() {
    common::init_logger();
    let mut gb = GameBoy::new(RomBuilder::new().build(), EngineOptions::default()).unwrap();
    let (tx, rx) = audio_queue(8192);
    let _sampler = gb.attach_audio(tx).unwrap().expect("sound is enabled");

    let mut copy = gb.snapshot();
    copy.mmu.write(0xFF25, 0xFF);
    copy.mmu.write(0xFF17, 0xF0);
    copy.mmu.write(0xFF19, 0x87);

    thread::sleep(Duration::from_millis(100));
    while let Some((l, r)) = rx.pop() {
        assert_eq!((l, r), (0, 0));
    }
}

#[test]
fn restore_resyncs_the_sampler() {
    common::init_logger();
    let mut gb = GameBoy::new(RomBuilder::new().build(), EngineOptions::default()).unwrap();
    let (tx, rx) = audio_queue(8192);
    let _sampler = gb.attach_audio(tx).unwrap().expect("sound is enabled");

    let mut loud = gb.snapshot();
    loud.mmu.write(0xFF25, 0xFF);
    loud.mmu.write(0xFF17, 0xF0);
    loud.mmu.write(0xFF19, 0x87);

    gb.restore(&loud);
    let mut heard = false;
    assert!(wait_for(|| {
        while let Some((l, _)) = rx.pop() {
            heard |= l != 0;
        }
        heard
    }));
}

#[test]
fn muted_channel_is_silent_in_the_sampler() {
    common::init_logger();
    let mut gb = GameBoy::new(square_tone_rom(), EngineOptions::default()).unwrap();
    let (tx, rx) = audio_queue(8192);
    let _sampler = gb.attach_audio(tx).unwrap().expect("sound is enabled");

    assert!(gb.toggle_sound_channel(1));
    gb.update();
    thread::sleep(Duration::from_millis(150));
    while let Some(frame) = rx.pop() {
        assert_eq!(frame, (0, 0));
    }

    assert!(!gb.toggle_sound_channel(1));
    let mut heard = false;
    assert!(wait_for(|| {
        while let Some((l, _)) = rx.pop() {
            heard |= l != 0;
        }
        heard
    }));
}
