use log::debug;
use serde::{Deserialize, Serialize};

use crate::audio_queue::Frame;

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

// Output gain applied to the mixed signal in [-1, 1].
const VOLUME_SCALE: f32 = 16_384.0;

const NR10: usize = 0x00;
const NR30: usize = 0x0A;
const NR32: usize = 0x0C;
const NR41: usize = 0x10;
const NR42: usize = 0x11;
const NR43: usize = 0x12;
const NR50: usize = 0x14;
const NR51: usize = 0x15;

/// Registers FF10-FF26 after the boot ROM.
const POWER_ON_REGS: [u8; 0x17] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1,
];

/// Bits that always read back as 1 for FF10-FF26.
const READ_MASK: [u8; 0x17] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x00, 0x00, 0x70,
];

// Duty table for pulse channels. Index (0..3) corresponds to duty selector in NRx1:
// 12.5%, 25%, 50%, 75%.
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

// NR32 output level: mute, 100%, 50%, 25%.
const WAVE_VOLUME: [f32; 4] = [0.0, 1.0, 0.5, 0.25];

// Safety valve for absurd noise frequencies relative to the sample rate.
const MAX_LFSR_CLOCKS_PER_SAMPLE: u32 = 64;

/// The signal a channel produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    Square { duty: u8 },
    Wave,
    Noise { lfsr: u16, width7: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Envelope {
    /// Current volume step (0-15).
    steps: u8,
    increasing: bool,
    samples_per_step: u32,
    elapsed: u32,
}

impl Envelope {
    fn from_register(val: u8, sample_rate: u32) -> Self {
        Self {
            steps: val >> 4,
            increasing: val & 0x08 != 0,
            samples_per_step: (val & 0x07) as u32 * sample_rate / 64,
            elapsed: 0,
        }
    }

    fn tick(&mut self) {
        if self.samples_per_step == 0 {
            return;
        }
        self.elapsed += 1;
        if self.elapsed < self.samples_per_step {
            return;
        }
        self.elapsed = 0;
        if self.increasing {
            self.steps = (self.steps + 1).min(15);
        } else {
            self.steps = self.steps.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Sweep {
    shift: u8,
    decreasing: bool,
    samples_per_step: u32,
    elapsed: u32,
}

impl Sweep {
    fn from_register(val: u8, sample_rate: u32) -> Self {
        Self {
            shift: val & 0x07,
            decreasing: val & 0x08 != 0,
            // Sweep steps every period/128 s.
            samples_per_step: ((val >> 4) & 0x07) as u32 * sample_rate / 128,
            elapsed: 0,
        }
    }

    fn active(&self) -> bool {
        self.samples_per_step > 0 && self.shift > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Channel {
    waveform: Waveform,
    /// Output frequency in Hz.
    frequency: f32,
    /// 11-bit period register for square and wave channels.
    freq_reg: u16,
    /// Position within the current waveform period, 0..1.
    phase: f32,
    /// Wave channel output level.
    amplitude: f32,
    /// Remaining samples, or `None` when length is disabled.
    duration: Option<u32>,
    envelope: Envelope,
    sweep: Sweep,
    dac: bool,
    on: bool,
}

impl Channel {
    fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            frequency: 0.0,
            freq_reg: 0,
            phase: 0.0,
            amplitude: 1.0,
            duration: None,
            envelope: Envelope::default(),
            sweep: Sweep::default(),
            dac: false,
            on: false,
        }
    }

    fn playing(&self) -> bool {
        self.on && self.dac && self.duration != Some(0)
    }

    fn volume(&self) -> f32 {
        match self.waveform {
            Waveform::Wave => self.amplitude,
            Waveform::Square { .. } | Waveform::Noise { .. } => self.envelope.steps as f32 / 15.0,
        }
    }

    /// Produce one sample in [-1, 1] and advance timers by one sample.
    fn sample(&mut self, sample_rate: u32, wave_table: &[u8; 32]) -> f32 {
        if !self.playing() {
            return 0.0;
        }

        let level = match self.waveform {
            Waveform::Square { duty } => {
                DUTY_TABLE[duty as usize & 0x03][(self.phase * 8.0) as usize & 0x07] as f32
            }
            Waveform::Wave => wave_table[(self.phase * 32.0) as usize & 0x1F] as f32 / 15.0,
            Waveform::Noise { lfsr, .. } => (!lfsr & 0x01) as f32,
        };
        let out = (level * 2.0 - 1.0) * self.volume();

        self.advance_phase(sample_rate);
        self.tick_timers();
        out
    }

    fn advance_phase(&mut self, sample_rate: u32) {
        self.phase += self.frequency / sample_rate as f32;
        if self.phase < 1.0 {
            return;
        }
        let wraps = self.phase.floor();
        self.phase -= wraps;
        if let Waveform::Noise { lfsr, width7 } = &mut self.waveform {
            for _ in 0..(wraps as u32).min(MAX_LFSR_CLOCKS_PER_SAMPLE) {
                let bit = (*lfsr ^ (*lfsr >> 1)) & 0x01;
                *lfsr = (*lfsr >> 1) | (bit << 14);
                if *width7 {
                    *lfsr = (*lfsr & !0x40) | (bit << 6);
                }
            }
        }
    }

    fn tick_timers(&mut self) {
        if let Some(remaining) = self.duration.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.on = false;
            }
        }

        self.envelope.tick();

        if self.sweep.active() {
            self.sweep.elapsed += 1;
            if self.sweep.elapsed >= self.sweep.samples_per_step {
                self.sweep.elapsed = 0;
                let delta = self.freq_reg >> self.sweep.shift;
                let next = if self.sweep.decreasing {
                    self.freq_reg.saturating_sub(delta)
                } else {
                    self.freq_reg + delta
                };
                if next > 0x7FF {
                    self.on = false;
                } else {
                    self.freq_reg = next;
                    self.frequency = square_frequency(next);
                }
            }
        }
    }
}

fn square_frequency(reg: u16) -> f32 {
    131_072.0 / (2048 - reg as u32) as f32
}

fn wave_frequency(reg: u16) -> f32 {
    65_536.0 / (2048 - reg as u32) as f32
}

fn noise_frequency(nr43: u8) -> f32 {
    let divisor = match nr43 & 0x07 {
        0 => 0.5,
        d => d as f32,
    };
    let shift = (nr43 >> 4) as i32;
    524_288.0 / divisor / 2f32.powi(shift + 1)
}

/// Length in samples for a length counter of `max - len` 1/256 s ticks.
fn length_samples(max: u32, len: u32, sample_rate: u32) -> u32 {
    (max - len.min(max)) * sample_rate / 256
}

/// Audio processing unit: register file plus four synthesis channels.
///
/// Register writes are applied immediately. Samples are produced on demand by
/// [`Apu::sample`], which also advances envelopes, sweep and length timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apu {
    regs: [u8; 0x17],
    wave_ram: [u8; 0x10],
    #[serde(with = "crate::byte_array")]
    wave_table: [u8; 32],
    channels: [Channel; 4],
    powered: bool,
    sample_rate: u32,
    /// Debug mute per channel. Muted channels keep running but are left out
    /// of the mix.
    muted: [bool; 4],
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        let mut apu = Self {
            regs: POWER_ON_REGS,
            wave_ram: [0; 0x10],
            wave_table: [0; 32],
            channels: [
                Channel::new(Waveform::Square { duty: 2 }),
                Channel::new(Waveform::Square { duty: 2 }),
                Channel::new(Waveform::Wave),
                Channel::new(Waveform::Noise {
                    lfsr: 0x7FFF,
                    width7: false,
                }),
            ],
            powered: true,
            sample_rate: sample_rate.max(1),
            muted: [false; 4],
        };
        // Power-on wave RAM alternates 0x00 / 0xFF.
        for i in 0..0x10u16 {
            let val = if i & 0x02 != 0 { 0xFF } else { 0x00 };
            apu.write_wave_ram(0xFF30 + i, val);
        }
        apu
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Whether channel `idx` (0-3) is currently producing sound.
    pub fn channel_active(&self, idx: usize) -> bool {
        self.channels.get(idx).is_some_and(Channel::playing)
    }

    pub fn channel_muted(&self, idx: usize) -> bool {
        self.muted.get(idx).copied().unwrap_or(false)
    }

    pub fn set_channel_muted(&mut self, idx: usize, muted: bool) {
        if let Some(slot) = self.muted.get_mut(idx)
            && *slot != muted
        {
            *slot = muted;
            debug!("APU channel {} {}", idx + 1, if muted { "muted" } else { "unmuted" });
        }
    }

    /// Flip the mute of channel `idx` (0-3). Returns the new state.
    pub fn toggle_channel(&mut self, idx: usize) -> bool {
        let muted = !self.channel_muted(idx);
        self.set_channel_muted(idx, muted);
        muted
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => {
                let mut val = if self.powered { 0x80 } else { 0x00 };
                for (i, ch) in self.channels.iter().enumerate() {
                    if ch.playing() {
                        val |= 1 << i;
                    }
                }
                val | READ_MASK[0x16]
            }
            0xFF10..=0xFF25 => {
                let idx = (addr - 0xFF10) as usize;
                self.regs[idx] | READ_MASK[idx]
            }
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize],
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if (0xFF30..=0xFF3F).contains(&addr) {
            self.write_wave_ram(addr, val);
            return;
        }
        if addr == 0xFF26 {
            self.write_power(val);
            return;
        }
        if !self.powered || !(0xFF10..=0xFF25).contains(&addr) {
            return;
        }

        let idx = (addr - 0xFF10) as usize;
        self.regs[idx] = val;
        apu_trace!("APU write {addr:04X} <- {val:02X}");

        match addr {
            0xFF10 => self.channels[0].sweep = Sweep::from_register(val, self.sample_rate),
            0xFF11 | 0xFF16 => {
                let ch = &mut self.channels[square_index(addr)];
                ch.waveform = Waveform::Square { duty: val >> 6 };
            }
            0xFF12 | 0xFF17 | 0xFF21 => {
                let ch = &mut self.channels[channel_index(addr)];
                ch.dac = val & 0xF8 != 0;
                if !ch.dac {
                    ch.on = false;
                }
            }
            0xFF13 | 0xFF18 | 0xFF1D => self.update_frequency(channel_index(addr)),
            0xFF14 | 0xFF19 | 0xFF1E => {
                let n = channel_index(addr);
                self.update_frequency(n);
                if val & 0x80 != 0 {
                    self.trigger(n);
                }
            }
            0xFF1A => {
                let ch = &mut self.channels[2];
                ch.dac = val & 0x80 != 0;
                if !ch.dac {
                    ch.on = false;
                }
            }
            0xFF1C => self.channels[2].amplitude = WAVE_VOLUME[((val >> 5) & 0x03) as usize],
            0xFF22 => {
                let ch = &mut self.channels[3];
                ch.frequency = noise_frequency(val);
                if let Waveform::Noise { width7, .. } = &mut ch.waveform {
                    *width7 = val & 0x08 != 0;
                }
            }
            0xFF23 => {
                if val & 0x80 != 0 {
                    self.trigger(3);
                }
            }
            _ => {}
        }
    }

    fn write_wave_ram(&mut self, addr: u16, val: u8) {
        let idx = (addr - 0xFF30) as usize;
        self.wave_ram[idx] = val;
        self.wave_table[idx * 2] = val >> 4;
        self.wave_table[idx * 2 + 1] = val & 0x0F;
    }

    fn write_power(&mut self, val: u8) {
        let on = val & 0x80 != 0;
        if self.powered && !on {
            // Powering off clears every register except wave RAM.
            self.regs = [0; 0x17];
            for ch in self.channels.iter_mut() {
                ch.on = false;
                ch.dac = false;
                ch.duration = None;
            }
        }
        self.powered = on;
    }

    fn freq_reg(&self, n: usize) -> u16 {
        let base = n * 5;
        (((self.regs[base + 4] & 0x07) as u16) << 8) | self.regs[base + 3] as u16
    }

    fn update_frequency(&mut self, n: usize) {
        let reg = self.freq_reg(n);
        let ch = &mut self.channels[n];
        ch.freq_reg = reg;
        ch.frequency = match ch.waveform {
            Waveform::Square { .. } => square_frequency(reg),
            Waveform::Wave => wave_frequency(reg),
            Waveform::Noise { .. } => ch.frequency,
        };
    }

    fn trigger(&mut self, n: usize) {
        let rate = self.sample_rate;
        let base = n * 5;
        let nrx1 = self.regs[base + 1] as u32;
        let nrx4 = self.regs[base + 4];
        let length_enabled = nrx4 & 0x40 != 0;

        match n {
            0 | 1 => {
                let nrx2 = self.regs[base + 2];
                let sweep = if n == 0 {
                    Sweep::from_register(self.regs[NR10], rate)
                } else {
                    Sweep::default()
                };
                let ch = &mut self.channels[n];
                ch.envelope = Envelope::from_register(nrx2, rate);
                ch.sweep = sweep;
                ch.dac = nrx2 & 0xF8 != 0;
                ch.duration = length_enabled.then(|| length_samples(64, nrx1 & 0x3F, rate));
            }
            2 => {
                let nr30 = self.regs[NR30];
                let nr32 = self.regs[NR32];
                let ch = &mut self.channels[2];
                ch.dac = nr30 & 0x80 != 0;
                ch.amplitude = WAVE_VOLUME[((nr32 >> 5) & 0x03) as usize];
                ch.duration = length_enabled.then(|| length_samples(256, nrx1, rate));
            }
            3 => {
                let nr41 = self.regs[NR41] as u32;
                let nr42 = self.regs[NR42];
                let nr43 = self.regs[NR43];
                let ch = &mut self.channels[3];
                ch.envelope = Envelope::from_register(nr42, rate);
                ch.dac = nr42 & 0xF8 != 0;
                ch.frequency = noise_frequency(nr43);
                ch.waveform = Waveform::Noise {
                    lfsr: 0x7FFF,
                    width7: nr43 & 0x08 != 0,
                };
                ch.duration = length_enabled.then(|| length_samples(64, nr41 & 0x3F, rate));
            }
            _ => unreachable!("APU has four channels, got {n}"),
        }

        if n != 3 {
            self.update_frequency(n);
        }
        let ch = &mut self.channels[n];
        ch.phase = 0.0;
        ch.on = ch.dac;
        apu_trace!("APU trigger ch{} freq={:.1}Hz", n + 1, ch.frequency);
    }

    /// Produce the next stereo frame and advance every channel by one sample.
    pub fn sample(&mut self) -> Frame {
        if !self.powered {
            return (0, 0);
        }

        let rate = self.sample_rate;
        let nr51 = self.regs[NR51];
        let nr50 = self.regs[NR50];
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for (i, ch) in self.channels.iter_mut().enumerate() {
            let out = ch.sample(rate, &self.wave_table);
            if self.muted[i] {
                continue;
            }
            if nr51 & (0x10 << i) != 0 {
                left += out;
            }
            if nr51 & (0x01 << i) != 0 {
                right += out;
            }
        }

        let left_vol = (((nr50 >> 4) & 0x07) + 1) as f32 / 8.0;
        let right_vol = ((nr50 & 0x07) + 1) as f32 / 8.0;
        let left = left / 4.0 * left_vol * VOLUME_SCALE;
        let right = right / 4.0 * right_vol * VOLUME_SCALE;
        (left as i16, right as i16)
    }

    /// Fill `out` with consecutive frames.
    pub fn render(&mut self, out: &mut [Frame]) {
        for frame in out.iter_mut() {
            *frame = self.sample();
        }
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

fn channel_index(addr: u16) -> usize {
    ((addr - 0xFF10) / 5) as usize
}

fn square_index(addr: u16) -> usize {
    if addr < 0xFF15 { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_square2(apu: &mut Apu, nr21: u8, nr22: u8, freq: u16, nr24_extra: u8) {
        apu.write_reg(0xFF16, nr21);
        apu.write_reg(0xFF17, nr22);
        apu.write_reg(0xFF18, freq as u8);
        apu.write_reg(0xFF19, 0x80 | nr24_extra | ((freq >> 8) as u8 & 0x07));
    }

    #[test]
    fn frequency_formulas() {
        assert_eq!(square_frequency(0), 64.0);
        assert_eq!(square_frequency(1024), 128.0);
        assert_eq!(wave_frequency(1024), 64.0);
        // divisor 0 counts as 0.5, shift 0 halves once
        assert_eq!(noise_frequency(0x00), 524_288.0);
        assert_eq!(noise_frequency(0x12), 524_288.0 / 2.0 / 4.0);
    }

    #[test]
    fn trigger_sets_status_bit() {
        let mut apu = Apu::new(44_100);
        assert_eq!(apu.read_reg(0xFF26) & 0x0F, 0);
        trigger_square2(&mut apu, 0x80, 0xF0, 1024, 0);
        assert!(apu.channel_active(1));
        assert_eq!(apu.read_reg(0xFF26), 0xF2);
    }

    #[test]
    fn dac_off_silences_channel() {
        let mut apu = Apu::new(44_100);
        trigger_square2(&mut apu, 0x80, 0x00, 1024, 0);
        assert!(!apu.channel_active(1));
        assert_eq!(apu.sample(), (0, 0));
    }

    #[test]
    fn length_counter_expires() {
        let mut apu = Apu::new(256);
        // length 62 of 64 -> 2/256 s -> 2 samples at 256 Hz
        trigger_square2(&mut apu, 0x80 | 62, 0xF0, 0, 0x40);
        assert!(apu.channel_active(1));
        apu.sample();
        assert!(apu.channel_active(1));
        apu.sample();
        assert!(!apu.channel_active(1));
    }

    #[test]
    fn envelope_decreases_volume() {
        let mut apu = Apu::new(64);
        // initial 2, decreasing, period 1 -> one step per sample at 64 Hz
        trigger_square2(&mut apu, 0x80, 0x21, 0, 0);
        assert_eq!(apu.channels[1].envelope.steps, 2);
        apu.sample();
        assert_eq!(apu.channels[1].envelope.steps, 1);
        apu.sample();
        apu.sample();
        assert_eq!(apu.channels[1].envelope.steps, 0);
    }

    #[test]
    fn routing_gates_output_sides() {
        let mut apu = Apu::new(44_100);
        apu.write_reg(0xFF25, 0x02);
        apu.write_reg(0xFF24, 0x77);
        // 75% duty: first step is low, second is high
        trigger_square2(&mut apu, 0xC0, 0xF0, 0, 0);
        let (left, right) = apu.sample();
        assert_eq!(left, 0);
        assert!(right < 0);
    }

    #[test]
    fn sweep_overflow_disables_channel_one() {
        let mut apu = Apu::new(128);
        // period 1 (one step per sample at 128 Hz), increasing, shift 1
        apu.write_reg(0xFF10, 0x11);
        apu.write_reg(0xFF12, 0xF0);
        apu.write_reg(0xFF13, 0xFF);
        apu.write_reg(0xFF14, 0x87);
        assert!(apu.channel_active(0));
        apu.sample();
        assert!(!apu.channel_active(0));
    }

    #[test]
    fn wave_ram_reads_back_and_expands() {
        let mut apu = Apu::new(44_100);
        assert_eq!(apu.read_reg(0xFF30), 0x00);
        assert_eq!(apu.read_reg(0xFF32), 0xFF);
        apu.write_reg(0xFF30, 0xA5);
        assert_eq!(apu.read_reg(0xFF30), 0xA5);
        assert_eq!(&apu.wave_table[..2], &[0x0A, 0x05]);
    }

    #[test]
    fn power_off_clears_registers_and_ignores_writes() {
        let mut apu = Apu::new(44_100);
        apu.write_reg(0xFF26, 0x00);
        assert_eq!(apu.read_reg(0xFF26), 0x70);
        assert_eq!(apu.read_reg(0xFF24), 0x00);
        apu.write_reg(0xFF24, 0x77);
        assert_eq!(apu.read_reg(0xFF24), 0x00);
        apu.write_reg(0xFF26, 0x80);
        apu.write_reg(0xFF24, 0x77);
        assert_eq!(apu.read_reg(0xFF24), 0x77);
    }

    #[test]
    fn muted_channel_is_left_out_of_the_mix() {
        let mut apu = Apu::new(44_100);
        apu.write_reg(0xFF25, 0x22);
        trigger_square2(&mut apu, 0x80, 0xF0, 1024, 0);
        let mut reference = apu.clone();

        assert!(apu.toggle_channel(1));
        let mut frames = [(0i16, 0i16); 64];
        apu.render(&mut frames);
        assert!(frames.iter().all(|&f| f == (0, 0)));
        // Muting does not stop the channel itself.
        assert!(apu.channel_active(1));

        assert!(!apu.toggle_channel(1));
        let mut expected = [(0i16, 0i16); 64];
        reference.render(&mut expected);
        let mut resumed = [(0i16, 0i16); 64];
        apu.render(&mut resumed);
        reference.render(&mut expected);
        assert_eq!(resumed, expected);
    }

    #[test]
    fn noise_is_deterministic() {
        let mut a = Apu::new(44_100);
        a.write_reg(0xFF25, 0x88);
        a.write_reg(0xFF21, 0xF0);
        a.write_reg(0xFF22, 0x21);
        a.write_reg(0xFF23, 0x80);
        let mut b = a.clone();
        let mut out_a = [(0, 0); 256];
        let mut out_b = [(0, 0); 256];
        a.render(&mut out_a);
        b.render(&mut out_b);
        assert_eq!(out_a, out_b);
        assert!(out_a.iter().any(|&(l, _)| l > 0));
        assert!(out_a.iter().any(|&(l, _)| l < 0));
    }
}
