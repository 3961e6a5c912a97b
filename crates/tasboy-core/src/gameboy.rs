use std::io;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    audio_queue::AudioProducer,
    cartridge::Cartridge,
    config::EngineOptions,
    cpu::Cpu,
    error::LoadError,
    input::Button,
    mmu::Mmu,
    palette::Rgb,
    sampler::AudioSampler,
};

/// CPU clock in Hz.
pub const CLOCK_HZ: u32 = 4_194_304;

/// Cycle budget of one `update()` call.
pub const CYCLES_PER_FRAME: u32 = CLOCK_HZ / 60;

/// Cost of one step while the CPU is halted.
const HALT_CYCLES: u32 = 4;

/// Hardware the engine is emulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    Dmg,
    Cgb,
}

/// A complete machine. Cloning yields an independent copy that shares only
/// the read-only ROM image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    model: Model,
    carried_cycles: u32,
    options: EngineOptions,
}

impl GameBoy {
    pub fn new(rom: impl Into<Arc<[u8]>>, options: EngineOptions) -> Result<Self, LoadError> {
        let cart = Cartridge::new(rom)?;
        let support = cart.cgb_support();
        let cgb = options.request_cgb && support.supports_cgb();
        if !support.supports_dmg() && !cgb {
            warn!("\"{}\" requires CGB hardware, running in DMG mode", cart.title);
        }
        let model = if cgb { Model::Cgb } else { Model::Dmg };
        info!("Starting \"{}\" in {model:?} mode", cart.title);

        Ok(Self {
            cpu: Cpu::new(cgb),
            mmu: Mmu::new(cart, cgb, options.sample_rate),
            model,
            carried_cycles: 0,
            options,
        })
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.mmu.cart
    }

    /// Cycles the last `update()` ran past the frame budget.
    pub fn carried_cycles(&self) -> u32 {
        self.carried_cycles
    }

    /// Frames completed by the PPU since power-on.
    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frames()
    }

    /// Run one frame's worth of cycles. Returns the cycles spent in this call,
    /// not counting the remainder carried in from the previous one.
    pub fn update(&mut self) -> u32 {
        let mut total = self.carried_cycles;
        let start = total;
        while total < CYCLES_PER_FRAME {
            let cost = if self.cpu.halted {
                HALT_CYCLES
            } else {
                self.cpu.step(&mut self.mmu)
            };
            self.mmu.step_timers(cost);

            let video = cost / self.mmu.speed_factor();
            self.mmu.step_video(video);
            total += video;

            total += self.cpu.service_interrupts(&mut self.mmu);
        }
        self.carried_cycles = total - CYCLES_PER_FRAME;
        total - start
    }

    pub fn press_button(&mut self, button: Button) {
        self.mmu.press_button(button);
    }

    pub fn release_button(&mut self, button: Button) {
        self.mmu.release_button(button);
    }

    /// Last completed frame, 160x144 RGB pixels in row-major order.
    pub fn framebuffer(&self) -> &[Rgb] {
        self.mmu.ppu.framebuffer()
    }

    pub fn save_data(&self) -> Vec<u8> {
        self.mmu.cart.save_data()
    }

    pub fn load_save_data(&mut self, data: &[u8]) {
        self.mmu.cart.load_save_data(data);
    }

    /// Flip the debug mute of sound channel `channel` (0-3). Returns whether
    /// it is now muted.
    pub fn toggle_sound_channel(&mut self, channel: usize) -> bool {
        let muted = !self.mmu.apu.channel_muted(channel);
        self.mmu.set_channel_muted(channel, muted);
        muted
    }

    /// Debug switch: draw frames without the background and window layers.
    pub fn set_hide_background(&mut self, hide: bool) {
        self.mmu.ppu.set_hide_background(hide);
    }

    /// Debug switch: draw frames without sprites.
    pub fn set_hide_sprites(&mut self, hide: bool) {
        self.mmu.ppu.set_hide_sprites(hide);
    }

    /// Independent copy of the current state. The copy is never wired to an
    /// audio sampler.
    pub fn snapshot(&self) -> GameBoy {
        self.clone()
    }

    /// Replace the current state with `snapshot`, keeping the audio sampler
    /// attached and resynchronising it. Debug layer and mute switches stay as
    /// they are.
    pub fn restore(&mut self, snapshot: &GameBoy) {
        let tap = self.mmu.take_tap();
        let hide_background = self.mmu.ppu.hide_background();
        let hide_sprites = self.mmu.ppu.hide_sprites();
        let muted: [bool; 4] = std::array::from_fn(|i| self.mmu.apu.channel_muted(i));

        *self = snapshot.clone();
        self.mmu.ppu.set_hide_background(hide_background);
        self.mmu.ppu.set_hide_sprites(hide_sprites);
        for (i, muted) in muted.into_iter().enumerate() {
            self.mmu.apu.set_channel_muted(i, muted);
        }
        self.mmu.set_tap(tap);
        self.mmu.resync_audio();
    }

    /// Start an audio sampler feeding `producer` and route audio register
    /// writes to it. Returns `None` when sound is disabled. Dropping the
    /// returned sampler stops it.
    pub fn attach_audio(&mut self, producer: AudioProducer) -> io::Result<Option<AudioSampler>> {
        if !self.options.sound_enabled {
            info!("Sound disabled, not starting audio sampler");
            return Ok(None);
        }
        let sampler =
            AudioSampler::spawn(self.mmu.apu.clone(), producer, self.options.lookahead_frames())?;
        self.mmu.set_tap(sampler.tap());
        Ok(Some(sampler))
    }
}
