use super::config::InstrumentConfig;
use super::patch::Patch;
use super::prelude::{clamp_velocity, MAX_NOTE};
use super::voice::Voice;
use std::sync::Arc;
use tracing::{debug, trace};

pub const CC_CHANNEL_VOLUME: u8 = 7;
pub const CC_SUSTAIN_PEDAL: u8 = 64;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Index of a voice slot inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub usize);

/// Fixed-size arena of voices. All slots are created up front so note
/// handling never allocates.
pub struct VoicePool {
    voices: Vec<Voice>,
    patch: Arc<Patch>,
    sample_rate: f32,
    steal_fade_samples: u32,
    allow_overlap: bool,
    age_counter: u64,
    sustain_pedal: bool,
    channel_volume: f32,
}

impl VoicePool {
    pub fn new(
        capacity: usize,
        patch: Arc<Patch>,
        sample_rate: f32,
        steal_fade_samples: u32,
        allow_overlap: bool,
    ) -> Self {
        let voices = (0..capacity.max(1))
            .map(|slot| Voice::new(patch.clone(), slot as u64))
            .collect();
        Self {
            voices,
            patch,
            sample_rate,
            steal_fade_samples,
            allow_overlap,
            age_counter: 0,
            sustain_pedal: false,
            channel_volume: 1.0,
        }
    }

    pub fn from_config(config: &InstrumentConfig, patch: Arc<Patch>, sample_rate: f32) -> Self {
        Self::new(
            config.polyphony,
            patch,
            sample_rate,
            config.steal_fade_samples(sample_rate),
            config.allow_note_overlap,
        )
    }

    /// Starts `note` with the pool's current patch.
    pub fn note_on(&mut self, note: u8, velocity: f32) -> VoiceHandle {
        let patch = self.patch.clone();
        self.allocate(note, velocity, patch)
    }

    /// Assigns a voice to a note.
    ///
    /// A note that is already sounding, or queued behind a steal fade, keeps
    /// its slot unless overlap is allowed. Otherwise the lowest free slot is used. With no free slot,
    /// the releasing voice closest to silence is stolen, or failing that the
    /// oldest voice; ties go to the lowest slot. A stolen voice fades out
    /// briefly and the new note starts in that slot when the fade ends.
    pub fn allocate(&mut self, note: u8, velocity: f32, patch: Arc<Patch>) -> VoiceHandle {
        let note = note.min(MAX_NOTE);
        let velocity = clamp_velocity(velocity);
        self.age_counter += 1;
        let age = self.age_counter;

        if !self.allow_overlap {
            if let Some(slot) = self
                .voices
                .iter()
                .position(|v| v.pending_note() == Some(note))
            {
                trace!(slot, note, "refresh queued note");
                self.voices[slot].refresh_pending(velocity, age);
                return VoiceHandle(slot);
            }
            if let Some(slot) = self
                .voices
                .iter()
                .position(|v| v.is_active() && v.note() == note && !v.has_pending())
            {
                trace!(slot, note, "retrigger");
                self.voices[slot].retrigger(velocity, age, self.sample_rate);
                return VoiceHandle(slot);
            }
        }

        if let Some(slot) = self.voices.iter().position(|v| !v.is_active()) {
            trace!(slot, note, velocity, "note on");
            self.voices[slot].activate(note, velocity, patch, age, self.sample_rate);
            return VoiceHandle(slot);
        }

        let slot = self.steal_candidate();
        debug!(
            slot,
            stolen_note = self.voices[slot].note(),
            note,
            "stealing voice"
        );
        self.voices[slot].steal(
            note,
            velocity,
            patch,
            age,
            self.steal_fade_samples,
            self.sample_rate,
        );
        VoiceHandle(slot)
    }

    fn steal_candidate(&self) -> usize {
        let releasing = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_releasing() && !v.has_pending())
            .min_by(|(_, a), (_, b)| {
                a.level()
                    .total_cmp(&b.level())
                    .then(a.age().cmp(&b.age()))
            })
            .map(|(slot, _)| slot);

        releasing.unwrap_or_else(|| {
            self.voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| (v.has_pending(), v.age()))
                .map(|(slot, _)| slot)
                .unwrap_or(0)
        })
    }

    /// Note-off. Releases every sounding, non-releasing voice playing `note`
    /// and cancels a queued start of it. With the sustain pedal down both are
    /// held instead. Returns how many voices changed; zero (no matching note)
    /// is not an error.
    pub fn release(&mut self, note: u8) -> usize {
        let mut changed = 0;
        for voice in self.voices.iter_mut() {
            if voice.pending_note() == Some(note) {
                if !self.sustain_pedal {
                    voice.cancel_pending(note);
                    changed += 1;
                } else if !voice.is_pending_pedal_held() {
                    voice.hold_pending_for_pedal();
                    changed += 1;
                }
            }
            if !voice.is_active()
                || voice.is_releasing()
                || voice.note() != note
                || voice.has_pending()
            {
                continue;
            }
            if self.sustain_pedal {
                if !voice.is_pedal_held() {
                    voice.hold_for_pedal();
                    changed += 1;
                }
            } else if voice.release(self.sample_rate) {
                changed += 1;
            }
        }
        changed
    }

    pub fn release_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.release(self.sample_rate);
        }
    }

    /// Silences every voice immediately.
    pub fn kill_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.kill();
        }
    }

    pub fn set_sustain_pedal(&mut self, down: bool) {
        self.sustain_pedal = down;
        if !down {
            for voice in self.voices.iter_mut() {
                if voice.is_pending_pedal_held() {
                    if let Some(note) = voice.pending_note() {
                        voice.cancel_pending(note);
                    }
                }
                if voice.is_pedal_held() {
                    voice.release(self.sample_rate);
                }
            }
        }
    }

    pub fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_CHANNEL_VOLUME => self.channel_volume = value.min(127) as f32 / 127.0,
            CC_SUSTAIN_PEDAL => self.set_sustain_pedal(value >= 64),
            CC_ALL_SOUND_OFF => self.kill_all(),
            CC_ALL_NOTES_OFF => self.release_all(),
            _ => trace!(controller, value, "ignoring control change"),
        }
    }

    /// Patch used by voices started from now on. Sounding voices keep theirs.
    pub fn set_patch(&mut self, patch: Arc<Patch>) {
        debug!(name = patch.name(), algorithm = %patch.algorithm(), "patch changed");
        self.patch = patch;
    }

    pub fn patch(&self) -> &Arc<Patch> {
        &self.patch
    }

    /// Renders all active voices over `out` (overwriting it) and reclaims
    /// voices that have gone silent.
    pub fn tick(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.render(out, self.sample_rate);
        }
        if self.channel_volume != 1.0 {
            for sample in out.iter_mut() {
                *sample *= self.channel_volume;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, handle: VoiceHandle) -> Option<&Voice> {
        self.voices.get(handle.0)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn sustain_pedal(&self) -> bool {
        self.sustain_pedal
    }

    pub fn channel_volume(&self) -> f32 {
        self.channel_volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::envelope::{EnvelopeParams, EnvelopeStage};
    use crate::synth::operator::OperatorParams;
    use crate::synth::algorithm::Algorithm;

    const SR: f32 = 44_100.0;

    fn pool(capacity: usize) -> VoicePool {
        VoicePool::new(capacity, Arc::new(Patch::sine()), SR, 16, false)
    }

    fn slow_release_patch() -> Arc<Patch> {
        let op = OperatorParams {
            envelope: EnvelopeParams {
                attack: 0,
                decay: 0,
                sustain: 99,
                release: 25,
            },
            ..OperatorParams::default()
        };
        Arc::new(Patch::new("PAD", vec![op], Algorithm::default()).unwrap())
    }

    #[test]
    fn prefers_free_slots_in_order() {
        let mut pool = pool(4);
        assert_eq!(pool.note_on(60, 100.0), VoiceHandle(0));
        assert_eq!(pool.note_on(62, 100.0), VoiceHandle(1));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn never_exceeds_capacity_and_steals_oldest() {
        let mut pool = pool(4);
        for note in 60..64 {
            pool.note_on(note, 100.0);
        }
        assert_eq!(pool.active_count(), 4);
        let handle = pool.note_on(70, 100.0);
        assert_eq!(handle, VoiceHandle(0));
        assert_eq!(pool.active_count(), 4);

        let mut out = vec![0.0; 64];
        pool.tick(&mut out);
        assert_eq!(pool.active_count(), 4);
        assert_eq!(pool.voice(handle).unwrap().note(), 70);
    }

    #[test]
    fn steals_quietest_releasing_voice_first() {
        let mut pool = VoicePool::new(3, slow_release_patch(), SR, 16, false);
        pool.note_on(60, 100.0);
        pool.note_on(62, 100.0);
        pool.note_on(64, 100.0);
        pool.release(62);
        let mut out = vec![0.0; 32];
        pool.tick(&mut out);
        assert_eq!(pool.note_on(67, 100.0), VoiceHandle(1));
    }

    #[test]
    fn repeated_note_on_for_queued_note_keeps_one_voice() {
        let mut pool = pool(2);
        pool.note_on(60, 100.0);
        pool.note_on(61, 100.0);
        let first = pool.note_on(70, 100.0);
        let second = pool.note_on(70, 80.0);
        assert_eq!(first, second);

        let mut out = vec![0.0; 64];
        pool.tick(&mut out);
        let notes: Vec<u8> = pool
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .map(|v| v.note())
            .collect();
        assert_eq!(notes, vec![70, 61]);
        assert_eq!(pool.voice(first).unwrap().velocity(), 80.0);
    }

    #[test]
    fn untouched_slot_has_zero_level() {
        let mut pool = pool(2);
        pool.note_on(60, 100.0);
        let idle = pool.voice(VoiceHandle(1)).unwrap();
        assert_eq!(idle.level(), 0.0);
        assert!(!idle.is_active());
    }

    #[test]
    fn pedal_holds_note_queued_behind_steal() {
        let mut pool = pool(1);
        pool.note_on(60, 100.0);
        pool.control_change(CC_SUSTAIN_PEDAL, 127);
        let handle = pool.note_on(70, 100.0);
        assert_eq!(pool.release(70), 1);
        assert_eq!(pool.voice(handle).unwrap().pending_note(), Some(70));

        let mut out = vec![0.0; 64];
        pool.tick(&mut out);
        let voice = pool.voice(handle).unwrap();
        assert_eq!(voice.note(), 70);
        assert!(voice.is_pedal_held());
        assert!(!voice.is_releasing());

        pool.control_change(CC_SUSTAIN_PEDAL, 0);
        assert!(pool.voice(handle).unwrap().is_releasing());
    }

    #[test]
    fn pedal_up_drops_held_queued_note() {
        let mut pool = pool(1);
        pool.note_on(60, 100.0);
        pool.control_change(CC_SUSTAIN_PEDAL, 127);
        let handle = pool.note_on(70, 100.0);
        pool.release(70);
        pool.control_change(CC_SUSTAIN_PEDAL, 0);
        assert_eq!(pool.voice(handle).unwrap().pending_note(), None);
    }

    #[test]
    fn release_twice_is_a_no_op() {
        let mut pool = VoicePool::new(2, slow_release_patch(), SR, 16, false);
        let handle = pool.note_on(60, 100.0);
        assert_eq!(pool.release(60), 1);
        let level = pool.voice(handle).unwrap().level();
        assert_eq!(pool.release(60), 0);
        let voice = pool.voice(handle).unwrap();
        assert!(voice.is_releasing());
        assert_eq!(voice.level(), level);
        assert_eq!(pool.release(99), 0);
    }

    #[test]
    fn same_note_retriggers_in_place() {
        let mut pool = pool(4);
        let first = pool.note_on(60, 100.0);
        let second = pool.note_on(60, 50.0);
        assert_eq!(first, second);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.voice(first).unwrap().velocity(), 50.0);
    }

    #[test]
    fn overlap_allows_duplicate_notes() {
        let mut pool = VoicePool::new(4, Arc::new(Patch::sine()), SR, 16, true);
        pool.note_on(60, 100.0);
        pool.note_on(60, 100.0);
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn finished_voices_are_reclaimed() {
        let mut pool = pool(2);
        pool.note_on(60, 100.0);
        pool.release(60);
        let mut out = vec![0.0; 8];
        pool.tick(&mut out);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn sustain_pedal_defers_note_off() {
        let mut pool = pool(2);
        let handle = pool.note_on(60, 100.0);
        pool.control_change(CC_SUSTAIN_PEDAL, 127);
        assert_eq!(pool.release(60), 1);
        assert!(!pool.voice(handle).unwrap().is_releasing());
        pool.control_change(CC_SUSTAIN_PEDAL, 0);
        assert!(pool.voice(handle).unwrap().is_releasing());
    }

    #[test]
    fn all_sound_off_and_volume() {
        let mut pool = pool(2);
        pool.note_on(60, 100.0);
        pool.control_change(CC_CHANNEL_VOLUME, 0);
        let mut out = vec![1.0; 32];
        pool.tick(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        pool.control_change(CC_ALL_SOUND_OFF, 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn patch_change_applies_to_new_voices_only() {
        let mut pool = pool(2);
        let old = pool.note_on(60, 100.0);
        let pad = slow_release_patch();
        pool.set_patch(pad.clone());
        let new = pool.note_on(64, 100.0);
        assert_eq!(pool.voice(old).unwrap().patch().name(), "SINE");
        assert!(Arc::ptr_eq(pool.voice(new).unwrap().patch(), &pad));
        assert_eq!(
            pool.voice(new).unwrap().operator_states()[0].envelope().stage(),
            EnvelopeStage::Sustain
        );
    }
}
