//! Battery-backed cartridge RAM on disk.
//!
//! Save files sit next to the ROM with a `.sav` extension. The [`Autosaver`]
//! writes them from a background thread so the emulation loop never blocks on
//! the filesystem.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use log::{debug, error, info, warn};

use crate::gameboy::GameBoy;

/// `<rom>.sav` next to the ROM.
pub fn save_path(rom_path: &Path) -> PathBuf {
    rom_path.with_extension("sav")
}

/// Read a save file. A missing file is not an error and yields `None`.
pub fn load(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => {
            info!("Loaded {} bytes of save data from {}", data.len(), path.display());
            Ok(Some(data))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `data` to `path` through a temporary file so a crash never leaves a
/// truncated save behind.
pub fn write(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("sav.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

enum Command {
    Save(Vec<u8>),
    Shutdown,
}

/// Background writer for battery RAM.
pub struct Autosaver {
    tx: cb::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
    last_submit: Option<Instant>,
    last_data: Vec<u8>,
}

impl Autosaver {
    pub fn spawn(path: PathBuf, interval: Duration) -> io::Result<Self> {
        let (tx, rx) = cb::unbounded::<Command>();
        let handle = thread::Builder::new()
            .name("tasboy-autosave".into())
            .spawn(move || run(path, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
            interval,
            last_submit: None,
            last_data: Vec::new(),
        })
    }

    /// Queue `data` for writing.
    pub fn submit(&mut self, data: Vec<u8>) {
        self.last_data.clone_from(&data);
        if self.tx.send(Command::Save(data)).is_err() {
            warn!("Autosave thread has exited; dropping save");
        }
    }

    /// Submit the machine's RAM if the interval elapsed and it changed since
    /// the last write. Returns whether a save was queued. Carts without a
    /// battery are never saved.
    pub fn maybe_submit(&mut self, gb: &GameBoy, now: Instant) -> bool {
        if !gb.cartridge().is_battery_backed() {
            return false;
        }
        if let Some(last) = self.last_submit
            && now.saturating_duration_since(last) < self.interval
        {
            return false;
        }
        self.last_submit = Some(now);

        let data = gb.save_data();
        if data == self.last_data {
            return false;
        }
        self.submit(data);
        true
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Autosave thread panicked");
        }
    }
}

fn run(path: PathBuf, rx: cb::Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        let mut data = match cmd {
            Command::Save(data) => data,
            Command::Shutdown => break,
        };
        // Only the newest pending save matters.
        let mut shutdown = false;
        while let Ok(next) = rx.try_recv() {
            match next {
                Command::Save(newer) => data = newer,
                Command::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        match write(&path, &data) {
            Ok(()) => debug!("Autosaved {} bytes to {}", data.len(), path.display()),
            Err(e) => error!("Failed to write save file {}: {e}", path.display()),
        }
        if shutdown {
            break;
        }
    }
    debug!("Autosave thread stopped");
}
