use super::algorithm::MAX_OPERATORS;
use super::operator::OperatorState;
use super::patch::Patch;
use super::prelude::MAX_FM_INSTRUMENT_VELOCITY;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

/// A note waiting for its slot to finish a steal fade.
#[derive(Debug, Clone)]
struct PendingNote {
    note: u8,
    velocity: f32,
    patch: Arc<Patch>,
    age: u64,
    pedal_held: bool,
}

/// One polyphonic voice slot.
pub struct Voice {
    operator_states: Vec<OperatorState>,
    frequencies: Vec<f32>,
    patch: Arc<Patch>,
    active: bool,
    releasing: bool,
    pedal_held: bool, // note-off arrived while the sustain pedal was down
    note_number: u8,
    velocity: f32,
    velocity_scale: f32,
    age: u64,
    pending: Option<PendingNote>,
    rng: SmallRng,
}

impl Voice {
    /// Creates an inactive voice. `seed` makes the noise waveform reproducible.
    pub fn new(patch: Arc<Patch>, seed: u64) -> Self {
        Self {
            operator_states: Vec::with_capacity(MAX_OPERATORS),
            frequencies: Vec::with_capacity(MAX_OPERATORS),
            patch,
            active: false,
            releasing: false,
            pedal_held: false,
            note_number: 0,
            velocity: 0.0,
            velocity_scale: 0.0,
            age: 0,
            pending: None,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Starts a new note from silence.
    pub fn activate(
        &mut self,
        note: u8,
        velocity: f32,
        patch: Arc<Patch>,
        age: u64,
        sample_rate: f32,
    ) {
        self.patch = patch;
        self.active = true;
        self.releasing = false;
        self.pedal_held = false;
        self.note_number = note;
        self.velocity = velocity;
        self.velocity_scale = velocity / MAX_FM_INSTRUMENT_VELOCITY;
        self.age = age;
        self.pending = None;

        let num_ops = self.patch.operators().len();
        self.operator_states
            .resize_with(num_ops, OperatorState::default);
        for (state, params) in self
            .operator_states
            .iter_mut()
            .zip(self.patch.operators())
        {
            state.start(params, sample_rate);
        }
        self.frequencies.clear();
        self.frequencies.extend(self.patch.frequencies(note));
    }

    /// Restarts the envelopes of a sounding note without resetting phase, so
    /// the attack continues from the current level.
    pub fn retrigger(&mut self, velocity: f32, age: u64, sample_rate: f32) {
        self.releasing = false;
        self.pedal_held = false;
        self.velocity = velocity;
        self.velocity_scale = velocity / MAX_FM_INSTRUMENT_VELOCITY;
        self.age = age;
        for (state, params) in self
            .operator_states
            .iter_mut()
            .zip(self.patch.operators())
        {
            state.retrigger(params, sample_rate);
        }
    }

    /// Moves every operator into Release. Returns false when the voice was
    /// not sounding or already releasing.
    pub fn release(&mut self, sample_rate: f32) -> bool {
        if !self.active || self.releasing {
            return false;
        }
        self.releasing = true;
        self.pedal_held = false;
        for (state, params) in self
            .operator_states
            .iter_mut()
            .zip(self.patch.operators())
        {
            state.release(params, sample_rate);
        }
        true
    }

    /// Fades the current note out over `fade_samples` and queues a new note
    /// to start in this slot once the fade completes.
    pub fn steal(
        &mut self,
        note: u8,
        velocity: f32,
        patch: Arc<Patch>,
        age: u64,
        fade_samples: u32,
        sample_rate: f32,
    ) {
        if !self.active {
            self.activate(note, velocity, patch, age, sample_rate);
            return;
        }
        self.releasing = true;
        self.pedal_held = false;
        for state in self.operator_states.iter_mut() {
            state.force_release(fade_samples);
        }
        self.pending = Some(PendingNote {
            note,
            velocity,
            patch,
            age,
            pedal_held: false,
        });
        if self.carriers_idle() {
            self.start_pending(sample_rate);
        }
    }

    /// Note queued behind a steal fade, if any.
    pub fn pending_note(&self) -> Option<u8> {
        self.pending.as_ref().map(|p| p.note)
    }

    /// Whether the queued note already got its note-off while the sustain
    /// pedal was down.
    pub fn is_pending_pedal_held(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.pedal_held)
    }

    /// A repeated note-on for the queued note refreshes it instead of
    /// starting a second voice.
    pub fn refresh_pending(&mut self, velocity: f32, age: u64) {
        if let Some(pending) = self.pending.as_mut() {
            pending.velocity = velocity;
            pending.age = age;
            pending.pedal_held = false;
        }
    }

    /// Drops a queued note, if it matches.
    pub fn cancel_pending(&mut self, note: u8) -> bool {
        if self.pending.as_ref().map(|p| p.note) == Some(note) {
            self.pending = None;
            return true;
        }
        false
    }

    /// Immediate silence, no fade.
    pub fn kill(&mut self) {
        for state in self.operator_states.iter_mut() {
            state.kill();
        }
        self.active = false;
        self.releasing = false;
        self.pedal_held = false;
        self.pending = None;
    }

    pub(crate) fn hold_for_pedal(&mut self) {
        self.pedal_held = true;
    }

    pub(crate) fn hold_pending_for_pedal(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.pedal_held = true;
        }
    }

    /// Adds this voice's output to `out`, one sample at a time. The voice
    /// frees itself (or starts its pending note) as soon as every carrier
    /// envelope is idle.
    pub fn render(&mut self, out: &mut [f32], sample_rate: f32) {
        for sample in out.iter_mut() {
            if !self.active {
                return;
            }
            let value = self.patch.algorithm().render_sample(
                self.patch.operators(),
                &mut self.operator_states,
                &self.frequencies,
                sample_rate,
                &mut self.rng,
            );
            *sample += value * self.velocity_scale;

            if self.releasing && self.carriers_idle() {
                if self.pending.is_some() {
                    self.start_pending(sample_rate);
                } else {
                    self.active = false;
                    self.releasing = false;
                }
            }
        }
    }

    fn start_pending(&mut self, sample_rate: f32) {
        if let Some(next) = self.pending.take() {
            self.activate(next.note, next.velocity, next.patch, next.age, sample_rate);
            self.pedal_held = next.pedal_held;
        }
    }

    fn carriers_idle(&self) -> bool {
        self.patch
            .algorithm()
            .carriers()
            .iter()
            .all(|&op| {
                self.operator_states
                    .get(op)
                    .map_or(true, |state| state.envelope().is_idle())
            })
    }

    /// Loudest carrier envelope level, used to pick the voice closest to silence.
    pub fn level(&self) -> f32 {
        self.patch
            .algorithm()
            .carriers()
            .iter()
            .filter_map(|&op| self.operator_states.get(op))
            .map(|state| state.envelope().level())
            .fold(0.0, f32::max)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    pub fn is_pedal_held(&self) -> bool {
        self.pedal_held
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn note(&self) -> u8 {
        self.note_number
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn patch(&self) -> &Arc<Patch> {
        &self.patch
    }

    pub fn operator_states(&self) -> &[OperatorState] {
        &self.operator_states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::envelope::EnvelopeStage;

    const SR: f32 = 44_100.0;

    fn sine() -> Arc<Patch> {
        Arc::new(Patch::sine())
    }

    #[test]
    fn activated_voice_renders_and_release_frees_it() {
        let mut voice = Voice::new(sine(), 0);
        voice.activate(69, 127.0, sine(), 1, SR);
        assert!(voice.is_active());
        assert_eq!(
            voice.operator_states()[0].envelope().stage(),
            EnvelopeStage::Sustain
        );

        let mut out = vec![0.0; 64];
        voice.render(&mut out, SR);
        assert!(out.iter().any(|s| s.abs() > 0.5));

        assert!(voice.release(SR));
        assert!(!voice.release(SR));
        let mut out = vec![0.0; 4];
        voice.render(&mut out, SR);
        assert!(!voice.is_active());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stolen_voice_fades_then_starts_pending_note() {
        let mut voice = Voice::new(sine(), 0);
        voice.activate(60, 100.0, sine(), 1, SR);
        voice.steal(72, 90.0, sine(), 2, 8, SR);
        assert!(voice.has_pending());
        assert_eq!(voice.note(), 60);

        let mut out = vec![0.0; 16];
        voice.render(&mut out, SR);
        assert!(voice.is_active());
        assert!(!voice.has_pending());
        assert_eq!(voice.note(), 72);
        assert_eq!(voice.age(), 2);
    }

    #[test]
    fn steal_of_idle_voice_starts_immediately() {
        let mut voice = Voice::new(sine(), 0);
        voice.steal(64, 80.0, sine(), 5, 8, SR);
        assert!(voice.is_active());
        assert_eq!(voice.note(), 64);
        assert!(!voice.has_pending());
    }

    #[test]
    fn fresh_voice_reports_silence() {
        let voice = Voice::new(sine(), 3);
        assert_eq!(voice.level(), 0.0);
        assert!(!voice.is_active());
        assert_eq!(voice.pending_note(), None);
    }

    #[test]
    fn pending_note_started_under_pedal_stays_held() {
        let mut voice = Voice::new(sine(), 0);
        voice.activate(60, 100.0, sine(), 1, SR);
        voice.steal(72, 90.0, sine(), 2, 8, SR);
        voice.hold_pending_for_pedal();
        assert!(voice.is_pending_pedal_held());

        let mut out = vec![0.0; 16];
        voice.render(&mut out, SR);
        assert_eq!(voice.note(), 72);
        assert!(voice.is_pedal_held());
    }

    #[test]
    fn kill_silences_immediately() {
        let mut voice = Voice::new(sine(), 0);
        voice.activate(60, 100.0, sine(), 1, SR);
        voice.kill();
        let mut out = vec![0.0; 8];
        voice.render(&mut out, SR);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!voice.is_active());
    }
}
