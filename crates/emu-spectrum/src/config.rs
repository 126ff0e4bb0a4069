//! Machine configuration.
//!
//! The host hands over JSON for the settings and the ROM images as raw
//! bytes; ROMs are never part of the serialised form.

use serde::{Deserialize, Serialize};
use sinclair_ula::UlaModel;

use crate::error::ConfigError;
use crate::shadow_rom::SHADOW_ROM_SIZE;

/// Supported Spectrum models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpectrumModel {
    #[default]
    Spectrum48K,
    Spectrum128K,
}

impl SpectrumModel {
    #[must_use]
    pub const fn ula(self) -> UlaModel {
        match self {
            Self::Spectrum48K => UlaModel::Spectrum48K,
            Self::Spectrum128K => UlaModel::Spectrum128K,
        }
    }

    /// Bytes of ROM the model expects.
    #[must_use]
    pub const fn rom_size(self) -> usize {
        match self {
            Self::Spectrum48K => 0x4000,
            Self::Spectrum128K => 0x8000,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.ula().name()
    }
}

/// Optional devices, attached after the ULA and beeper in list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeripheralKind {
    Kempston,
    TapeDeck,
    ShadowRom,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_snapshot_interval() -> u32 {
    50
}

/// Configuration for creating a Spectrum instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default)]
    pub model: SpectrumModel,
    /// ROM data: 16,384 bytes for the 48K, 32,768 for the 128K.
    #[serde(skip)]
    pub rom: Vec<u8>,
    /// 8K image for the shadow ROM peripheral.
    #[serde(skip)]
    pub shadow_rom: Vec<u8>,
    #[serde(default = "default_sample_rate")]
    pub audio_sample_rate: u32,
    /// Frames between snapshots embedded in a replay recording.
    #[serde(default = "default_snapshot_interval")]
    pub replay_snapshot_interval: u32,
    #[serde(default)]
    pub peripherals: Vec<PeripheralKind>,
}

impl SpectrumConfig {
    #[must_use]
    pub fn new(model: SpectrumModel, rom: Vec<u8>) -> Self {
        Self {
            model,
            rom,
            shadow_rom: Vec::new(),
            audio_sample_rate: default_sample_rate(),
            replay_snapshot_interval: default_snapshot_interval(),
            peripherals: Vec::new(),
        }
    }

    /// Parse settings; ROMs are attached afterwards.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn with_rom(mut self, rom: Vec<u8>) -> Self {
        self.rom = rom;
        self
    }

    #[must_use]
    pub fn with_shadow_rom(mut self, rom: Vec<u8>) -> Self {
        self.shadow_rom = rom;
        self
    }

    #[must_use]
    pub fn with_peripheral(mut self, kind: PeripheralKind) -> Self {
        self.peripherals.push(kind);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rom.len() != self.model.rom_size() {
            return Err(ConfigError::RomSize {
                model: self.model.name(),
                expected: self.model.rom_size(),
                found: self.rom.len(),
            });
        }
        if self.peripherals.contains(&PeripheralKind::ShadowRom)
            && self.shadow_rom.len() != SHADOW_ROM_SIZE
        {
            return Err(ConfigError::ShadowRomSize {
                expected: SHADOW_ROM_SIZE,
                found: self.shadow_rom.len(),
            });
        }
        Ok(())
    }
}
