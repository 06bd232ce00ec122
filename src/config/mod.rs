// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Persisted sequencer settings.
//!
//! A flat document read at transport start and when the studio is
//! reinitialised. YAML and TOML are both accepted, picked by file extension.

pub mod watcher;

pub use watcher::{validate_settings, SettingsEvent, SettingsWatcher};

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Root settings document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SequencerSettings {
    #[serde(default)]
    pub sequencer: SequencerOptions,
    #[serde(default)]
    pub general: GeneralOptions,
}

impl SequencerSettings {
    /// Load settings from a `.yaml`/`.yml` or `.toml` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        match SettingsFormat::from_path(path)? {
            SettingsFormat::Yaml => Self::from_yaml(&contents),
            SettingsFormat::Toml => Self::from_toml(&contents),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML settings")
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML settings")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize settings to YAML")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize settings to TOML")
    }

    /// Save settings, format picked by extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = match SettingsFormat::from_path(path)? {
            SettingsFormat::Yaml => self.to_yaml()?,
            SettingsFormat::Toml => self.to_toml()?,
        };
        fs::write(path, text).with_context(|| format!("Failed to write settings file: {:?}", path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsFormat {
    Yaml,
    Toml,
}

impl SettingsFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(SettingsFormat::Yaml),
            Some("toml") => Ok(SettingsFormat::Toml),
            other => bail!("Unsupported settings file extension {:?} for {:?}", other, path),
        }
    }

    fn is_settings_file(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

/// Master/slave role for an external sync protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Off,
    Master,
    Slave,
}

impl SyncMode {
    /// Value carried in the system event sent to the engine
    pub fn as_byte(self) -> u8 {
        match self {
            SyncMode::Off => 0,
            SyncMode::Master => 1,
            SyncMode::Slave => 2,
        }
    }
}

/// Transport, sync and audio routing options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequencerOptions {
    /// Use the short read-ahead and mix windows
    #[serde(default = "default_true")]
    pub audio_low_latency_monitoring: bool,
    #[serde(default)]
    pub jack_transport: bool,
    /// Act as JACK transport master; only meaningful with `jack_transport`
    #[serde(default)]
    pub jack_master: bool,
    #[serde(default)]
    pub mmc_mode: SyncMode,
    #[serde(default)]
    pub mtc_mode: SyncMode,
    #[serde(default)]
    pub midi_clock: SyncMode,
    #[serde(default)]
    pub midi_sync_auto_connect: bool,
    #[serde(default = "default_file_format")]
    pub audio_record_file_format: u8,
    #[serde(default)]
    pub audio_submaster_outs: bool,
    #[serde(default)]
    pub audio_fader_outs: bool,
    /// Sequencer timer name, "(auto)" lets the engine pick
    #[serde(default = "default_timer")]
    pub timer: String,
}

fn default_true() -> bool {
    true
}
fn default_file_format() -> u8 {
    1
}
fn default_timer() -> String {
    "(auto)".to_string()
}

impl SequencerOptions {
    /// JACK transport mode as sent to the engine: 0 off, 1 on, 2 master
    pub fn jack_transport_mode(&self) -> u8 {
        match (self.jack_transport, self.jack_master) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        }
    }
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            audio_low_latency_monitoring: true,
            jack_transport: false,
            jack_master: false,
            mmc_mode: SyncMode::Off,
            mtc_mode: SyncMode::Off,
            midi_clock: SyncMode::Off,
            midi_sync_auto_connect: false,
            audio_record_file_format: default_file_format(),
            audio_submaster_outs: false,
            audio_fader_outs: false,
            timer: default_timer(),
        }
    }
}

/// Longest count-in honoured, in bars
pub const MAX_COUNT_IN_BARS: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeneralOptions {
    /// Bars of count-in before recording starts
    #[serde(default)]
    pub count_in_bars: u32,
}

impl GeneralOptions {
    /// Count-in as a bar offset, capped at `MAX_COUNT_IN_BARS`
    pub fn count_in(&self) -> i32 {
        self.count_in_bars.min(MAX_COUNT_IN_BARS) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_yaml_settings() {
        let yaml = r#"
sequencer:
  audio_low_latency_monitoring: false
  jack_transport: true
  jack_master: true
  mmc_mode: master
  midi_clock: slave
  timer: "RTC timer"

general:
  count_in_bars: 2
"#;

        let settings = SequencerSettings::from_yaml(yaml).unwrap();
        assert!(!settings.sequencer.audio_low_latency_monitoring);
        assert_eq!(settings.sequencer.jack_transport_mode(), 2);
        assert_eq!(settings.sequencer.mmc_mode, SyncMode::Master);
        assert_eq!(settings.sequencer.midi_clock, SyncMode::Slave);
        assert_eq!(settings.sequencer.mtc_mode, SyncMode::Off);
        assert_eq!(settings.sequencer.timer, "RTC timer");
        assert_eq!(settings.general.count_in_bars, 2);
    }

    #[test]
    fn test_parse_toml_settings() {
        let text = r#"
[sequencer]
audio_fader_outs = true
audio_record_file_format = 0
mtc_mode = "slave"

[general]
count_in_bars = 1
"#;

        let settings = SequencerSettings::from_toml(text).unwrap();
        assert!(settings.sequencer.audio_fader_outs);
        assert!(!settings.sequencer.audio_submaster_outs);
        assert_eq!(settings.sequencer.audio_record_file_format, 0);
        assert_eq!(settings.sequencer.mtc_mode.as_byte(), 2);
        assert_eq!(settings.general.count_in_bars, 1);
    }

    #[test]
    fn test_default_values() {
        let settings = SequencerSettings::from_yaml("general: {}").unwrap();
        assert!(settings.sequencer.audio_low_latency_monitoring);
        assert_eq!(settings.sequencer.audio_record_file_format, 1);
        assert_eq!(settings.sequencer.timer, "(auto)");
        assert_eq!(settings.sequencer.jack_transport_mode(), 0);
        assert_eq!(settings.general.count_in_bars, 0);
        assert_eq!(settings, SequencerSettings::default());
    }

    #[test]
    fn test_jack_master_needs_transport() {
        let mut options = SequencerOptions::default();
        options.jack_master = true;
        assert_eq!(options.jack_transport_mode(), 0);
        options.jack_transport = true;
        options.jack_master = false;
        assert_eq!(options.jack_transport_mode(), 1);
    }

    #[test]
    fn test_count_in_is_capped() {
        let mut general = GeneralOptions::default();
        assert_eq!(general.count_in(), 0);
        general.count_in_bars = 2;
        assert_eq!(general.count_in(), 2);
        general.count_in_bars = u32::MAX;
        assert_eq!(general.count_in(), MAX_COUNT_IN_BARS as i32);
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = tempdir().unwrap();
        let mut settings = SequencerSettings::default();
        settings.general.count_in_bars = 3;
        settings.sequencer.mmc_mode = SyncMode::Slave;

        for name in ["settings.yaml", "settings.toml"] {
            let path = dir.path().join(name);
            settings.save(&path).unwrap();
            assert_eq!(SequencerSettings::load(&path).unwrap(), settings);
        }
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.ini");
        std::fs::write(&path, "count_in_bars=1").unwrap();
        assert!(SequencerSettings::load(&path).is_err());
        assert!(SequencerSettings::default().save(&path).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(SequencerSettings::from_yaml("sequencer: [").is_err());
        assert!(SequencerSettings::from_yaml("sequencer:\n  mmc_mode: sideways\n").is_err());
    }
}
