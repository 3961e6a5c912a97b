//! Deterministic Game Boy / Game Boy Color emulation engine.
//!
//! The same engine backs a live 60 Hz player and an offline speedrun editor
//! that re-simulates frame ranges from recorded inputs. Frontends drive it
//! through the [`gameboy::GameBoy`] facade: call `update()` once per frame,
//! feed button presses, and read `framebuffer()`.

/// Audio Processing Unit (APU) register file and channel synthesis.
pub mod apu;

/// Lock-free SPSC ring of stereo frames between the sampler and the host.
pub mod audio_queue;

/// Battery RAM save files and the background autosaver.
pub mod battery;

/// Cartridge header parsing, bank controllers and the MBC3 clock.
pub mod cartridge;

/// Engine options and their TOML file.
pub mod config;

/// LR35902 CPU core.
pub mod cpu;

/// Error types returned by loading and snapshot APIs.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Joypad input register.
pub mod input;

/// Interrupt sources, priorities and vectors.
pub mod interrupts;

/// ROM files and zip archives.
pub mod loader;

/// Memory map and hardware plumbing.
pub mod mmu;

/// DMG shades and CGB palette memory.
pub mod palette;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// CPU register file.
pub mod registers;

/// Audio sampler thread and the message tap that feeds it.
pub mod sampler;

/// Versioned snapshot files.
pub mod snapshot;

/// Divider/timer unit.
pub mod timer;

mod byte_array;

pub use config::EngineOptions;
pub use error::{LoadError, SnapshotError};
pub use gameboy::{CYCLES_PER_FRAME, GameBoy, Model};
pub use input::Button;
