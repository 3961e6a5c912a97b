use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::apu::DEFAULT_SAMPLE_RATE;

/// Engine knobs shared by the live frontend and the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineOptions {
    /// Run CGB-capable carts in CGB mode.
    pub request_cgb: bool,
    /// Spawn the audio sampler when a host attaches an audio queue.
    pub sound_enabled: bool,
    pub sample_rate: u32,
    /// How far ahead of playback the sampler renders.
    pub audio_lookahead_ms: u32,
    pub autosave_interval_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            request_cgb: true,
            sound_enabled: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
            audio_lookahead_ms: 50,
            autosave_interval_ms: 1000,
        }
    }
}

impl EngineOptions {
    /// Read options from a TOML file. A missing or malformed file yields the
    /// defaults.
    pub fn load_from_file(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(
                    "Failed to read engine config {}: {e}; using defaults",
                    path.display()
                );
                return Self::default();
            }
        };

        match toml::from_str::<EngineOptions>(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(
                    "Failed to parse engine config {}: {e}; using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let text = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Audio lookahead in stereo frames at the configured sample rate.
    pub fn lookahead_frames(&self) -> usize {
        (self.sample_rate as u64 * self.audio_lookahead_ms as u64 / 1000) as usize
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: EngineOptions = toml::from_str("request-cgb = false\nsample-rate = 48000\n").unwrap();
        assert!(!cfg.request_cgb);
        assert_eq!(cfg.sample_rate, 48_000);
        assert!(cfg.sound_enabled);
        assert_eq!(cfg.audio_lookahead_ms, 50);
    }

    #[test]
    fn lookahead_in_frames() {
        let cfg = EngineOptions::default();
        assert_eq!(cfg.lookahead_frames(), 2205);
        assert_eq!(cfg.autosave_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_or_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(EngineOptions::load_from_file(&missing), EngineOptions::default());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "sample-rate = \"loud\"").unwrap();
        assert_eq!(EngineOptions::load_from_file(&bad), EngineOptions::default());
    }

    #[test]
    fn unreadable_path_falls_back() {
        // Reading a directory fails with something other than NotFound.
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(EngineOptions::load_from_file(dir.path()), EngineOptions::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");
        let cfg = EngineOptions {
            sound_enabled: false,
            autosave_interval_ms: 250,
            ..EngineOptions::default()
        };
        cfg.save_to_file(&path).unwrap();
        assert_eq!(EngineOptions::load_from_file(&path), cfg);
    }
}
