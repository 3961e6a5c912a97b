use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as cb;
use log::{debug, info, trace, warn};

use crate::apu::Apu;
use crate::audio_queue::AudioProducer;

const TICK: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Message from the emulation thread to the audio sampler.
#[derive(Debug)]
pub enum ApuEvent {
    /// A register or wave RAM write, replayed on the sampler's own APU.
    Write { addr: u16, val: u8 },
    /// Replace the sampler's APU wholesale, e.g. after a snapshot restore.
    Resync(Box<Apu>),
    /// Debug mute of one channel (0-3).
    Mute { channel: usize, muted: bool },
}

/// Sending half that the MMU uses to forward audio writes.
///
/// A detached tap drops everything. Cloning always yields a detached tap so
/// snapshot copies of a machine never talk to the live sampler.
#[derive(Debug, Default)]
pub struct ApuTap {
    tx: Option<cb::Sender<ApuEvent>>,
}

impl ApuEvent {
    /// Replay this event on `apu`.
    pub fn apply_to(self, apu: &mut Apu) {
        match self {
            ApuEvent::Write { addr, val } => apu.write_reg(addr, val),
            ApuEvent::Mute { channel, muted } => apu.set_channel_muted(channel, muted),
            ApuEvent::Resync(fresh) => {
                debug!("Audio mirror resynced");
                *apu = *fresh;
            }
        }
    }
}

impl ApuTap {
    /// A tap paired with a receiver the caller drains itself, for offline
    /// rendering without a sampler thread.
    pub fn channel() -> (Self, cb::Receiver<ApuEvent>) {
        let (tx, rx) = cb::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    pub fn send(&self, event: ApuEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            trace!("audio sampler gone, dropping APU event");
        }
    }
}

impl Clone for ApuTap {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// Background thread that owns a mirror of the APU and keeps the audio queue
/// topped up to a fixed lookahead.
pub struct AudioSampler {
    tx: cb::Sender<ApuEvent>,
    shutdown: Option<cb::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AudioSampler {
    pub fn spawn(apu: Apu, producer: AudioProducer, lookahead_frames: usize) -> io::Result<Self> {
        let (tx, rx) = cb::unbounded::<ApuEvent>();
        let (shutdown_tx, shutdown_rx) = cb::bounded::<()>(1);
        let target = lookahead_frames.min(producer.capacity_frames());

        let handle = thread::Builder::new()
            .name("tasboy-audio".into())
            .spawn(move || run(apu, producer, target, rx, shutdown_rx))?;

        info!("Audio sampler started (lookahead {target} frames)");
        Ok(Self {
            tx,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn tap(&self) -> ApuTap {
        ApuTap {
            tx: Some(self.tx.clone()),
        }
    }
}

impl Drop for AudioSampler {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Audio sampler thread panicked");
        }
    }
}

fn run(
    mut apu: Apu,
    producer: AudioProducer,
    target: usize,
    events: cb::Receiver<ApuEvent>,
    shutdown: cb::Receiver<()>,
) {
    let ticker = cb::tick(TICK);
    fill(&mut apu, &producer, target);
    loop {
        cb::select! {
            recv(events) -> msg => match msg {
                Ok(event) => event.apply_to(&mut apu),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => fill(&mut apu, &producer, target),
        }
    }
    debug!("Audio sampler stopped");
}

fn fill(apu: &mut Apu, producer: &AudioProducer, target: usize) {
    let mut pushed = 0usize;
    while producer.len() < target {
        if !producer.push(apu.sample()) {
            break;
        }
        pushed += 1;
    }
    if pushed > 0 {
        trace!("Audio sampler queued {pushed} frames");
    }
}
