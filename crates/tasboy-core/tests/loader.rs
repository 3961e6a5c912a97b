mod common;

use std::fs::{self, File};
use std::io::Write;

use common::RomBuilder;
use tasboy_core::{LoadError, loader::load_rom};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn raw_rom_loads_verbatim() {
    common::init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("game.gb");
    let rom = RomBuilder::new().build();
    fs::write(&path, &rom).unwrap();
    assert_eq!(load_rom(&path).unwrap(), rom);
}

#[test]
fn single_entry_zip_is_extracted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("game.zip");
    let rom = RomBuilder::new().cgb_flag(0x80).build();
    write_zip(&path, &[("game.gbc", rom.as_slice())]);
    assert_eq!(load_rom(&path).unwrap(), rom);
}

#[test]
fn multi_entry_zip_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pack.zip");
    let rom = RomBuilder::new().build();
    write_zip(&path, &[("a.gb", rom.as_slice()), ("b.gb", rom.as_slice())]);
    assert!(matches!(load_rom(&path), Err(LoadError::ArchiveEntries(2))));
}

#[test]
fn short_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.gb");
    fs::write(&path, [0u8; 0x14F]).unwrap();
    assert!(matches!(load_rom(&path), Err(LoadError::HeaderTooShort(0x14F))));
}

#[test]
fn short_zip_entry_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.zip");
    write_zip(&path, &[("tiny.gb", &[0u8; 16][..])]);
    assert!(matches!(load_rom(&path), Err(LoadError::HeaderTooShort(16))));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        load_rom(&dir.path().join("nope.gb")),
        Err(LoadError::Io(_))
    ));
}
