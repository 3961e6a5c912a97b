use std::env;
use std::fs;
use std::path::Path;

use tasboy_core::{
    EngineOptions, GameBoy, audio_queue::Frame, loader::load_rom, sampler::ApuTap,
};

const DEFAULT_SECONDS: f64 = 3.0;
const USAGE: &str = "expected <rom> <output wav> [--seconds=N] [--dmg] [--rate=HZ]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let rom_path = args.next().ok_or(USAGE)?;
    let out_path = args.next().ok_or(USAGE)?;

    let mut seconds = DEFAULT_SECONDS;
    let mut options = EngineOptions::default();
    for arg in args {
        if let Some(value) = arg.strip_prefix("--seconds=") {
            seconds = value.parse()?;
        } else if let Some(value) = arg.strip_prefix("--rate=") {
            options.sample_rate = value.parse()?;
        } else if arg == "--dmg" {
            options.request_cgb = false;
        } else {
            return Err(format!("unrecognised flag: {arg}").into());
        }
    }
    if seconds <= 0.0 {
        return Err("seconds must be positive".into());
    }

    let rate = options.sample_rate;
    let rom = load_rom(Path::new(&rom_path))?;
    let mut gb = GameBoy::new(rom, options)?;

    // Mirror the machine's audio writes into a local APU and render it
    // frame by frame instead of running the real-time sampler.
    let (tap, events) = ApuTap::channel();
    gb.mmu.set_tap(tap);
    let mut apu = gb.mmu.apu.clone();

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let out = Path::new(&out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = hound::WavWriter::create(out, spec)?;

    let total_frames = (seconds * rate as f64).ceil() as usize;
    let per_update = (rate / 60).max(1) as usize;
    let mut buf: Vec<Frame> = vec![(0, 0); per_update];
    let mut written = 0usize;

    while written < total_frames {
        gb.update();
        for event in events.try_iter() {
            event.apply_to(&mut apu);
        }
        let n = per_update.min(total_frames - written);
        apu.render(&mut buf[..n]);
        for &(left, right) in &buf[..n] {
            writer.write_sample(left)?;
            writer.write_sample(right)?;
        }
        written += n;
    }
    writer.finalize()?;

    println!(
        "wrote {written} stereo frames ({seconds:.2}s, {} emulated frames) to {}",
        gb.frame_count(),
        out.display()
    );
    Ok(())
}
