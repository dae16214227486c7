/// Defaults loaded from the embedded config.toml and the user's file
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sequencer::arpeggiator::{ArpMode, ArpParams, ChordSet};
use crate::sequencer::engine::{Settings, BPM_RANGE};
use crate::sequencer::scale::Scale;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    defaults: DefaultsConfig,
    #[serde(default)]
    midi: MidiConfig,
}

#[derive(Deserialize, Default)]
struct DefaultsConfig {
    bpm: Option<u32>,
    scale: Option<String>,
    base_octave: Option<u8>,
    tie_mode: Option<bool>,
    velocity: Option<u8>,
    arp_mode: Option<String>,
    arp_rate: Option<u32>,
    arp_chords: Option<String>,
    arp_octaves: Option<u32>,
    random_amount: Option<usize>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    port: Option<String>,
}

pub struct Config {
    defaults: DefaultsConfig,
    midi: MidiConfig,
}

impl Config {
    /// Embedded defaults, overlaid with the user's file when it parses.
    pub fn load() -> Self {
        let mut config = Self::builtin();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path)
                    .map_err(ConfigError::from)
                    .and_then(|contents| Self::from_toml_str(&contents))
                {
                    Ok(user) => config.merge(user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    pub fn builtin() -> Self {
        match Self::from_toml_str(DEFAULT_CONFIG) {
            Ok(config) => config,
            Err(e) => {
                log::error!(target: "config", "embedded config.toml is malformed: {}", e);
                Self {
                    defaults: DefaultsConfig::default(),
                    midi: MidiConfig::default(),
                }
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Ok(Config {
            defaults: file.defaults,
            midi: file.midi,
        })
    }

    fn merge(&mut self, user: Config) {
        let base = &mut self.defaults;
        let over = user.defaults;
        base.bpm = over.bpm.or(base.bpm);
        base.scale = over.scale.or(base.scale.take());
        base.base_octave = over.base_octave.or(base.base_octave);
        base.tie_mode = over.tie_mode.or(base.tie_mode);
        base.velocity = over.velocity.or(base.velocity);
        base.arp_mode = over.arp_mode.or(base.arp_mode.take());
        base.arp_rate = over.arp_rate.or(base.arp_rate);
        base.arp_chords = over.arp_chords.or(base.arp_chords.take());
        base.arp_octaves = over.arp_octaves.or(base.arp_octaves);
        base.random_amount = over.random_amount.or(base.random_amount);
        self.midi.port = user.midi.port.or(self.midi.port.take());
    }

    pub fn settings(&self) -> Settings {
        let fallback = Settings::default();
        let d = &self.defaults;
        Settings {
            bpm: d
                .bpm
                .map(|bpm| bpm.clamp(*BPM_RANGE.start(), *BPM_RANGE.end()))
                .unwrap_or(fallback.bpm),
            scale: d
                .scale
                .as_deref()
                .and_then(Scale::from_key)
                .unwrap_or(fallback.scale),
            base_octave: d.base_octave.map(|b| b.min(127)).unwrap_or(fallback.base_octave),
            arp: ArpParams {
                mode: d
                    .arp_mode
                    .as_deref()
                    .and_then(ArpMode::from_key)
                    .unwrap_or(fallback.arp.mode),
                rate: d.arp_rate.unwrap_or(fallback.arp.rate).max(1),
                octaves: d.arp_octaves.unwrap_or(fallback.arp.octaves).max(1),
                chords: d
                    .arp_chords
                    .as_deref()
                    .and_then(ChordSet::from_key)
                    .unwrap_or(fallback.arp.chords),
            },
            tie_mode: d.tie_mode.unwrap_or(fallback.tie_mode),
            velocity: d.velocity.map(|v| v.min(127)).unwrap_or(fallback.velocity),
        }
    }

    pub fn random_amount(&self) -> usize {
        self.defaults.random_amount.unwrap_or(16)
    }

    /// Preferred output port substring; empty means "first available".
    pub fn midi_port(&self) -> &str {
        self.midi.port.as_deref().unwrap_or("")
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("seqarp").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_matches_engine_defaults() {
        let config = Config::builtin();
        assert_eq!(config.settings(), Settings::default());
        assert_eq!(config.random_amount(), 16);
        assert_eq!(config.midi_port(), "");
    }

    #[test]
    fn test_user_values_override() {
        let mut config = Config::builtin();
        let user = Config::from_toml_str(
            r#"
            [defaults]
            bpm = 96
            scale = "dorian"
            arp_mode = "up_down"
            arp_chords = "seventh_chord"

            [midi]
            port = "IAC"
            "#,
        )
        .unwrap();
        config.merge(user);

        let settings = config.settings();
        assert_eq!(settings.bpm, 96);
        assert_eq!(settings.scale, Scale::Dorian);
        assert_eq!(settings.arp.mode, ArpMode::UpDown);
        assert_eq!(settings.arp.chords, ChordSet::SeventhChord);
        assert_eq!(settings.arp.octaves, 2);
        assert_eq!(config.midi_port(), "IAC");
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let config = Config::from_toml_str(
            r#"
            [defaults]
            scale = "bebop"
            arp_rate = 0
            bpm = 5000
            "#,
        )
        .unwrap();
        let settings = config.settings();
        assert_eq!(settings.scale, Scale::Major);
        assert_eq!(settings.arp.rate, 1);
        assert_eq!(settings.bpm, *BPM_RANGE.end());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("[defaults\nbpm = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
