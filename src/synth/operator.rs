use super::envelope::{EnvelopeParams, EnvelopeState, MAX_LEVEL};
use super::prelude::note_frequency;
use super::waveform::{wrap_phase, Waveform};
use rand::rngs::SmallRng;

pub const MAX_COARSE: u8 = 31;
pub const MAX_FINE: u8 = 99;
pub const MAX_DETUNE: u8 = 14;
pub const MAX_FEEDBACK: u8 = 7;

const DETUNE_CENTER: u8 = 7;
const DETUNE_HZ_PER_STEP: f32 = 0.5;
const LEVEL_DB_PER_STEP: f32 = 0.75;
/// Self-modulation depth at maximum feedback, in cycles (half a cycle = pi radians).
const MAX_FEEDBACK_CYCLES: f32 = 0.5;

/// One operator of a patch, kept as raw parameter values so a decoded patch
/// re-encodes byte for byte. Derived quantities are computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorParams {
    pub waveform: Waveform,
    pub coarse: u8,
    pub fine: u8,
    pub detune: u8,
    pub level: u8,
    pub feedback: u8,
    pub envelope: EnvelopeParams,
}

impl OperatorParams {
    /// Frequency ratio relative to the note. Coarse 0 means one octave down.
    pub fn ratio(&self) -> f32 {
        let coarse = if self.coarse == 0 {
            0.5
        } else {
            self.coarse as f32
        };
        coarse * (1.0 + self.fine as f32 / 100.0)
    }

    /// Fixed offset in Hz added after the ratio.
    pub fn offset_hz(&self) -> f32 {
        (self.detune as f32 - DETUNE_CENTER as f32) * DETUNE_HZ_PER_STEP
    }

    /// Linear output gain. Level 99 is unity, 0 is silent.
    pub fn amplitude(&self) -> f32 {
        if self.level == 0 {
            return 0.0;
        }
        let steps_down = MAX_LEVEL.saturating_sub(self.level) as f32;
        10f32.powf(-steps_down * LEVEL_DB_PER_STEP / 20.0)
    }

    /// Self-modulation depth in cycles. Each feedback step doubles it.
    pub fn feedback_amount(&self) -> f32 {
        if self.feedback == 0 {
            return 0.0;
        }
        let steps_down = MAX_FEEDBACK.saturating_sub(self.feedback) as i32;
        MAX_FEEDBACK_CYCLES * 2f32.powi(-steps_down)
    }

    pub fn frequency(&self, note: u8) -> f32 {
        (note_frequency(note) * self.ratio() + self.offset_hz()).max(0.0)
    }
}

impl Default for OperatorParams {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            coarse: 1,
            fine: 0,
            detune: DETUNE_CENTER,
            level: MAX_LEVEL,
            feedback: 0,
            envelope: EnvelopeParams::default(),
        }
    }
}

/// Runtime state of one operator inside one voice.
#[derive(Debug, Clone, Default)]
pub struct OperatorState {
    phase: f32, // cycles, always in [0, 1)
    history: [f32; 2],
    envelope: EnvelopeState,
}

impl OperatorState {
    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn envelope(&self) -> &EnvelopeState {
        &self.envelope
    }

    /// Output of the most recent sample.
    pub fn last_output(&self) -> f32 {
        self.history[0]
    }

    /// Starts a fresh note: phase and feedback history are cleared and the
    /// envelope enters Attack from silence.
    pub fn start(&mut self, params: &OperatorParams, sample_rate: f32) {
        *self = Self::default();
        self.envelope.trigger(&params.envelope, sample_rate);
    }

    /// Retriggers the envelope while keeping phase continuity.
    pub fn retrigger(&mut self, params: &OperatorParams, sample_rate: f32) {
        self.envelope.trigger(&params.envelope, sample_rate);
    }

    pub fn release(&mut self, params: &OperatorParams, sample_rate: f32) {
        self.envelope.release(&params.envelope, sample_rate);
    }

    pub fn force_release(&mut self, fade_samples: u32) {
        self.envelope.force_release(fade_samples);
    }

    pub fn kill(&mut self) {
        self.envelope.kill();
        self.history = [0.0; 2];
    }

    /// Produces one sample and advances phase and envelope by one sample.
    ///
    /// `modulation` is the phase offset contributed by modulating operators,
    /// in cycles. Feedback averages the last two outputs to keep high
    /// feedback settings stable.
    pub fn advance(
        &mut self,
        params: &OperatorParams,
        frequency: f32,
        modulation: f32,
        sample_rate: f32,
        rng: &mut SmallRng,
    ) -> f32 {
        let feedback = if params.feedback > 0 {
            (self.history[0] + self.history[1]) * 0.5 * params.feedback_amount()
        } else {
            0.0
        };
        let wave = params
            .waveform
            .evaluate(self.phase + modulation + feedback, rng);
        let env = self.envelope.advance(&params.envelope, sample_rate);
        let out = wave * env * params.amplitude();

        self.phase = wrap_phase(self.phase + frequency / sample_rate);
        self.history = [out, self.history[0]];
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::envelope::EnvelopeStage;
    use crate::synth::prelude::TAU;
    use rand::SeedableRng;

    fn instant_sine() -> OperatorParams {
        OperatorParams {
            envelope: EnvelopeParams {
                attack: 0,
                decay: 0,
                sustain: MAX_LEVEL,
                release: 0,
            },
            ..OperatorParams::default()
        }
    }

    #[test]
    fn ratio_offset_and_level_mapping() {
        let mut op = OperatorParams::default();
        assert_eq!(op.ratio(), 1.0);
        assert_eq!(op.offset_hz(), 0.0);
        assert_eq!(op.amplitude(), 1.0);
        assert_eq!(op.frequency(69), 440.0);

        op.coarse = 0;
        assert_eq!(op.ratio(), 0.5);
        op.coarse = 2;
        op.fine = 50;
        assert!((op.ratio() - 3.0).abs() < 1e-6);
        op.detune = 9;
        assert_eq!(op.offset_hz(), 1.0);
        assert!((op.frequency(69) - 1321.0).abs() < 1e-2);

        op.level = 0;
        assert_eq!(op.amplitude(), 0.0);
        op.level = 91;
        // eight steps of 0.75 dB is -6 dB
        assert!((op.amplitude() - 0.501).abs() < 1e-3);
    }

    #[test]
    fn feedback_doubles_per_step() {
        let mut op = OperatorParams::default();
        assert_eq!(op.feedback_amount(), 0.0);
        op.feedback = 7;
        assert_eq!(op.feedback_amount(), 0.5);
        op.feedback = 6;
        assert_eq!(op.feedback_amount(), 0.25);
    }

    #[test]
    fn advance_produces_sine_and_wraps_phase() {
        let params = instant_sine();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut state = OperatorState::default();
        state.start(&params, 8.0);
        // 1 Hz at 8 samples per second: eighth-cycle steps
        for k in 0..64 {
            let expected = (TAU * k as f32 / 8.0).sin();
            let out = state.advance(&params, 1.0, 0.0, 8.0, &mut rng);
            assert!((out - expected).abs() < 1e-4, "sample {k}");
            assert!((0.0..1.0).contains(&state.phase()));
        }
    }

    #[test]
    fn modulation_shifts_phase() {
        let params = instant_sine();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut state = OperatorState::default();
        state.start(&params, 100.0);
        let out = state.advance(&params, 1.0, 0.25, 100.0, &mut rng);
        assert!((out - 1.0).abs() < 1e-4);
    }

    #[test]
    fn release_goes_idle_and_silences() {
        let params = instant_sine();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut state = OperatorState::default();
        state.start(&params, 100.0);
        state.advance(&params, 10.0, 0.0, 100.0, &mut rng);
        state.release(&params, 100.0);
        assert_eq!(state.envelope().stage(), EnvelopeStage::Idle);
        assert_eq!(state.advance(&params, 10.0, 0.0, 100.0, &mut rng), 0.0);
    }
}
