use crate::synth::prelude::{OnceLock, TAU};
use rand::rngs::SmallRng;
use rand::Rng;

const SINE_TABLE_SIZE: usize = 4096;

static SINE_TABLE: OnceLock<Vec<f32>> = OnceLock::new();

fn sine_table() -> &'static [f32] {
    SINE_TABLE.get_or_init(|| {
        // One guard point past the end so interpolation never wraps the index
        (0..=SINE_TABLE_SIZE)
            .map(|i| (TAU * i as f32 / SINE_TABLE_SIZE as f32).sin())
            .collect()
    })
}

/// Builds the process-wide sine lookup table. Safe to call any number of times.
pub fn init_tables() {
    let _ = sine_table();
}

/// Sine of a phase expressed in cycles, via the interpolated lookup table.
pub fn sine(phase: f32) -> f32 {
    let table = sine_table();
    let position = wrap_phase(phase) * SINE_TABLE_SIZE as f32;
    let index = (position as usize).min(SINE_TABLE_SIZE - 1);
    let frac = position - index as f32;
    table[index] + (table[index + 1] - table[index]) * frac
}

/// Wraps a phase in cycles into `[0, 1)`.
pub fn wrap_phase(phase: f32) -> f32 {
    let wrapped = phase - phase.floor();
    // `x - floor(x)` can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    SawtoothSmooth,
    Triangle,
    Noise,
}

impl Waveform {
    pub const ALL: [Waveform; 6] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::SawtoothSmooth,
        Waveform::Triangle,
        Waveform::Noise,
    ];

    /// Maps a sysex parameter value to a waveform.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        match self {
            Waveform::Sine => 0,
            Waveform::Square => 1,
            Waveform::Sawtooth => 2,
            Waveform::SawtoothSmooth => 3,
            Waveform::Triangle => 4,
            Waveform::Noise => 5,
        }
    }

    /// Evaluates the waveform at `phase` (in cycles, any range).
    /// Output is in `[-1, 1]`.
    pub fn evaluate(self, phase: f32, rng: &mut SmallRng) -> f32 {
        let phase = wrap_phase(phase);
        match self {
            Waveform::Sine => sine(phase),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * (phase - (phase + 0.5).floor()),
            Waveform::SawtoothSmooth => 0.75 * sine(phase) / (1.25 + sine(phase + 0.25)),
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            Waveform::Noise => rng.random_range(-1.0..1.0),
        }
    }
}
