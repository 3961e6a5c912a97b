//! Reading ROM images from disk, either raw or wrapped in a single-entry zip.

use std::io::{Cursor, Read};
use std::path::Path;

use log::{debug, info};

use crate::error::{LoadError, MIN_ROM_LEN};

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

pub fn load_rom(path: &Path) -> Result<Vec<u8>, LoadError> {
    let data = std::fs::read(path)?;
    let rom = if data.starts_with(&ZIP_MAGIC) {
        debug!("{} is a zip archive", path.display());
        extract_single(data)?
    } else {
        data
    };

    if rom.len() < MIN_ROM_LEN {
        return Err(LoadError::HeaderTooShort(rom.len()));
    }
    info!("Loaded ROM {} ({} bytes)", path.display(), rom.len());
    Ok(rom)
}

fn extract_single(data: Vec<u8>) -> Result<Vec<u8>, LoadError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    if archive.len() != 1 {
        return Err(LoadError::ArchiveEntries(archive.len()));
    }
    let mut entry = archive.by_index(0)?;
    debug!("Extracting {} from archive", entry.name());
    let mut rom = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut rom)?;
    Ok(rom)
}
