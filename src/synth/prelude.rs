// Shared constants and re-exports for the synthesis modules

pub use core::f32::consts::{PI, TAU};
pub use std::fmt;
pub use std::sync::OnceLock;

/// Process-wide output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Exclusive upper bound for note velocities. Velocities are normalized by
/// dividing by this value, so the loudest MIDI velocity (127) maps just below 1.0.
pub const MAX_FM_INSTRUMENT_VELOCITY: f32 = 128.0;

/// Highest MIDI note number.
pub const MAX_NOTE: u8 = 127;

/// Peak modulation index (in radians) a modulator at full level applies to its target.
pub const MAX_MODULATION_INDEX: f32 = 4.0 * PI;

/// Equal-tempered frequency of a MIDI note, A4 (69) = 440 Hz.
pub fn note_frequency(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

/// Clamps an arbitrary integer to a valid MIDI note number.
pub fn clamp_note(note: i32) -> u8 {
    note.clamp(0, MAX_NOTE as i32) as u8
}

/// Clamps a velocity into `[0, MAX_FM_INSTRUMENT_VELOCITY)`.
pub fn clamp_velocity(velocity: f32) -> f32 {
    if !velocity.is_finite() || velocity <= 0.0 {
        return 0.0;
    }
    velocity.min(MAX_FM_INSTRUMENT_VELOCITY - 1.0)
}
