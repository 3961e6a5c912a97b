//! Versioned on-disk machine snapshots.
//!
//! Layout (little endian):
//!
//! | bytes | field |
//! |---|---|
//! | 4 | magic `TBSS` |
//! | 2 | format version |
//! | 4 | ROM length |
//! | 2 | ROM header global checksum |
//! | .. | bincode-encoded [`GameBoy`] |
//!
//! The ROM itself is not stored. [`decode`] takes it from the caller and
//! rejects it if it does not match the recorded length and checksum.

use std::path::Path;

use log::debug;

use crate::cartridge::{Header, Rom};
use crate::error::SnapshotError;
use crate::gameboy::GameBoy;

pub const MAGIC: [u8; 4] = *b"TBSS";

/// Bump whenever the serialized machine layout changes.
pub const SNAPSHOT_VERSION: u16 = 1;

const HEADER_LEN: usize = 12;

fn fingerprint(rom: &Rom) -> (u32, u16) {
    let checksum = Header::parse(rom).map(|h| h.global_checksum()).unwrap_or(0);
    (rom.len() as u32, checksum)
}

pub fn encode(gb: &GameBoy) -> Result<Vec<u8>, SnapshotError> {
    let (rom_len, checksum) = fingerprint(gb.cartridge().rom());
    let mut out = Vec::with_capacity(HEADER_LEN + 64 * 1024);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&rom_len.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    let payload = bincode::serde::encode_to_vec(gb, bincode::config::standard())?;
    out.extend_from_slice(&payload);
    debug!("Encoded snapshot: {} bytes", out.len());
    Ok(out)
}

/// Version tag of a persisted snapshot, without decoding the payload.
pub fn peek_version(bytes: &[u8]) -> Result<u16, SnapshotError> {
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return Err(SnapshotError::Magic);
    }
    Ok(u16::from_le_bytes([bytes[4], bytes[5]]))
}

pub fn decode(bytes: &[u8], rom: Rom) -> Result<GameBoy, SnapshotError> {
    let version = peek_version(bytes)?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let rom_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let checksum = u16::from_le_bytes([bytes[10], bytes[11]]);
    if fingerprint(&rom) != (rom_len, checksum) {
        return Err(SnapshotError::RomMismatch);
    }

    let (mut gb, _): (GameBoy, usize) =
        bincode::serde::decode_from_slice(&bytes[HEADER_LEN..], bincode::config::standard())?;
    gb.mmu.cart.attach_rom(rom);
    Ok(gb)
}

pub fn save_to_file(gb: &GameBoy, path: &Path) -> Result<(), SnapshotError> {
    let bytes = encode(gb)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file(path: &Path, rom: Rom) -> Result<GameBoy, SnapshotError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, rom)
}
