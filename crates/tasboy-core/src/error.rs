use std::io;

use thiserror::Error;

/// Minimum ROM length: everything up to the end of the cartridge header.
pub const MIN_ROM_LEN: usize = 0x150;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read ROM: {0}")]
    Io(#[from] io::Error),
    #[error("malformed ROM archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("ROM archive must contain exactly one file, found {0}")]
    ArchiveEntries(usize),
    #[error("ROM is {0} bytes, too short to hold a cartridge header")]
    HeaderTooShort(usize),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("not a snapshot file")]
    Magic,
    #[error("snapshot version {found} is not supported (expected {expected})")]
    Version { found: u16, expected: u16 },
    #[error("snapshot was taken with a different ROM")]
    RomMismatch,
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}
