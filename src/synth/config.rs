use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Instrument-wide settings. Every field has a default, so a JSON document
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Number of voice slots (polyphony limit).
    pub polyphony: usize,
    /// Capacity of the pending note/control event queue.
    pub queue_capacity: usize,
    /// Fade applied to a voice that is stolen while still sounding.
    pub steal_fade_ms: f32,
    /// Linear gain applied to the mixed output.
    pub master_volume: f32,
    /// When false, a note-on for an already sounding note retriggers that voice.
    pub allow_note_overlap: bool,
    /// Resolution of MIDI packet timestamps.
    pub clock_ticks_per_second: u64,
}

impl InstrumentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polyphony == 0 {
            return Err(ConfigError::Invalid("polyphony must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if !self.steal_fade_ms.is_finite() || self.steal_fade_ms < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "steal_fade_ms {} is not a non-negative number",
                self.steal_fade_ms
            )));
        }
        if !self.master_volume.is_finite() || self.master_volume < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "master_volume {} is not a non-negative number",
                self.master_volume
            )));
        }
        if self.clock_ticks_per_second == 0 {
            return Err(ConfigError::Invalid(
                "clock_ticks_per_second must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn steal_fade_samples(&self, sample_rate: f32) -> u32 {
        (self.steal_fade_ms / 1000.0 * sample_rate).round() as u32
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            polyphony: 16,
            queue_capacity: 256,
            steal_fade_ms: 3.0,
            master_volume: 1.0,
            allow_note_overlap: false,
            clock_ticks_per_second: 1_000_000,
        }
    }
}
