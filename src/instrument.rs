use crate::error::{InstrumentError, MalformedSysexError, SchedulingOverflowError};
use crate::midi::{event_queue, HostClock, MidiPacket, MidiSender, Scheduler, SystemHostClock};
use crate::synth::config::InstrumentConfig;
use crate::synth::patch::Patch;
use crate::synth::pool::VoicePool;
use crate::synth::prelude::{clamp_note, clamp_velocity, SAMPLE_RATE};
use crate::synth::{sysex, waveform};
use std::sync::Arc;
use tracing::debug;

/// Sink for rendered samples, implemented by whatever owns the instrument's output.
pub trait AudioStream {
    fn write_samples(&mut self, samples: &[f32]);
}

impl AudioStream for Vec<f32> {
    fn write_samples(&mut self, samples: &[f32]) {
        self.extend_from_slice(samples);
    }
}

/// An FM instrument: a voice pool driven by a MIDI scheduler.
///
/// The instrument itself lives on the render thread. MIDI can be fed from any
/// other thread through [`FmInstrument::midi_sender`].
pub struct FmInstrument {
    pool: VoicePool,
    scheduler: Scheduler,
    sender: MidiSender,
    config: InstrumentConfig,
    buffer: Vec<f32>,
    track_number: usize,
}

impl FmInstrument {
    /// Prepares the shared lookup tables and reports the output sample rate.
    pub fn initialize() -> u32 {
        waveform::init_tables();
        SAMPLE_RATE
    }

    pub fn sample_rate() -> u32 {
        SAMPLE_RATE
    }

    /// Builds an instrument with default settings and the system clock.
    pub fn new(sysex: &[u8]) -> Result<Self, InstrumentError> {
        Self::with_config(
            sysex,
            InstrumentConfig::default(),
            Arc::new(SystemHostClock::new()),
        )
    }

    pub fn with_config(
        sysex: &[u8],
        config: InstrumentConfig,
        clock: Arc<dyn HostClock>,
    ) -> Result<Self, InstrumentError> {
        config.validate()?;
        let sample_rate = Self::initialize() as f32;
        let patch = Arc::new(sysex::decode(sysex)?);
        debug!(
            name = patch.name(),
            operators = patch.operators().len(),
            polyphony = config.polyphony,
            "instrument created"
        );

        let (sender, receiver) = event_queue(config.queue_capacity);
        let scheduler = Scheduler::new(
            receiver,
            clock,
            config.clock_ticks_per_second,
            sample_rate,
        );
        let pool = VoicePool::from_config(&config, patch, sample_rate);
        Ok(Self {
            pool,
            scheduler,
            sender,
            config,
            buffer: Vec::new(),
            track_number: 0,
        })
    }

    /// Queues a timestamped packet. Never blocks; an error means an older
    /// note event was discarded to make room.
    pub fn enqueue_midi_packet(&self, packet: &MidiPacket) -> Result<(), SchedulingOverflowError> {
        self.sender.enqueue(packet)
    }

    /// A handle for feeding packets from another thread.
    pub fn midi_sender(&self) -> MidiSender {
        self.sender.clone()
    }

    /// Plays or stops a note right away, bypassing the timestamp queue.
    /// Velocity 0 is a note-off. Out-of-range values are clamped.
    pub fn write_midi_note(&mut self, note: i32, velocity: i32) {
        let note = clamp_note(note);
        if velocity <= 0 {
            self.pool.release(note);
        } else {
            self.pool.note_on(note, clamp_velocity(velocity as f32));
        }
    }

    /// Renders `round(duration * sample_rate)` samples, reading the host
    /// clock for event timing.
    pub fn generate_samples_for_duration(&mut self, duration: f64) -> &[f32] {
        let len = Self::duration_to_samples(duration);
        self.prepare_buffer(len);
        self.scheduler
            .render_block(&mut self.pool, &mut self.buffer[..len]);
        self.finish_buffer(len)
    }

    /// Like [`generate_samples_for_duration`](Self::generate_samples_for_duration)
    /// with the host time of the first sample supplied by the caller.
    pub fn generate_samples_at(&mut self, duration: f64, observed_host_time: u64) -> &[f32] {
        let len = Self::duration_to_samples(duration);
        self.prepare_buffer(len);
        self.scheduler.render_block_at(
            &mut self.pool,
            &mut self.buffer[..len],
            Some(observed_host_time),
        );
        self.finish_buffer(len)
    }

    /// Renders straight into a caller-owned buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        self.scheduler.render_block(&mut self.pool, out);
        apply_gain(out, self.config.master_volume);
    }

    /// Renders a duration and hands the samples to `stream`.
    pub fn generate_into<S: AudioStream + ?Sized>(&mut self, duration: f64, stream: &mut S) {
        let samples = self.generate_samples_for_duration(duration);
        stream.write_samples(samples);
    }

    /// Replaces the patch for notes started from now on.
    pub fn set_patch_sysex(&mut self, bytes: &[u8]) -> Result<(), MalformedSysexError> {
        let patch = sysex::decode(bytes)?;
        self.pool.set_patch(Arc::new(patch));
        Ok(())
    }

    pub fn set_track_number(&mut self, track_number: usize) {
        self.track_number = track_number;
    }

    pub fn track_number(&self) -> usize {
        self.track_number
    }

    pub fn patch(&self) -> &Arc<Patch> {
        self.pool.patch()
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    fn duration_to_samples(duration: f64) -> usize {
        if !duration.is_finite() || duration <= 0.0 {
            return 0;
        }
        (duration * SAMPLE_RATE as f64).round() as usize
    }

    fn prepare_buffer(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0.0);
        }
    }

    fn finish_buffer(&mut self, len: usize) -> &[f32] {
        let out = &mut self.buffer[..len];
        apply_gain(out, self.config.master_volume);
        out
    }
}

fn apply_gain(out: &mut [f32], gain: f32) {
    if gain != 1.0 {
        for sample in out.iter_mut() {
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::ManualClock;

    fn instrument(config: InstrumentConfig) -> FmInstrument {
        FmInstrument::with_config(
            &sysex::encode(&Patch::sine()),
            config,
            Arc::new(ManualClock::new(1)),
        )
        .unwrap()
    }

    #[test]
    fn reports_fixed_sample_rate() {
        assert_eq!(FmInstrument::initialize(), 44_100);
        assert_eq!(FmInstrument::sample_rate(), 44_100);
    }

    #[test]
    fn construction_surfaces_bad_sysex() {
        let err = FmInstrument::new(&[0xF0, 0xF7]).err().unwrap();
        assert!(matches!(err, InstrumentError::Sysex(_)));
    }

    #[test]
    fn construction_rejects_bad_config() {
        let config = InstrumentConfig {
            polyphony: 0,
            ..InstrumentConfig::default()
        };
        let err = FmInstrument::with_config(
            &sysex::encode(&Patch::sine()),
            config,
            Arc::new(ManualClock::new(1)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, InstrumentError::Config(_)));
    }

    #[test]
    fn duration_rounds_to_samples() {
        let mut inst = instrument(InstrumentConfig::default());
        assert_eq!(inst.generate_samples_for_duration(0.01).len(), 441);
        assert_eq!(inst.generate_samples_for_duration(1.0 / 440.0).len(), 100);
        assert!(inst.generate_samples_for_duration(-1.0).is_empty());
        assert!(inst.generate_samples_for_duration(f64::NAN).is_empty());
    }

    #[test]
    fn write_midi_note_clamps_and_velocity_zero_releases() {
        let mut inst = instrument(InstrumentConfig::default());
        inst.write_midi_note(500, 1_000);
        assert_eq!(inst.active_voices(), 1);
        let voice = &inst.pool().voices()[0];
        assert_eq!(voice.note(), 127);
        assert!(voice.velocity() < 128.0);

        inst.write_midi_note(500, 0);
        inst.generate_samples_for_duration(0.001);
        assert_eq!(inst.active_voices(), 0);
    }

    #[test]
    fn master_volume_scales_output() {
        let mut loud = instrument(InstrumentConfig::default());
        let mut quiet = instrument(InstrumentConfig {
            master_volume: 0.5,
            ..InstrumentConfig::default()
        });
        loud.write_midi_note(69, 100);
        quiet.write_midi_note(69, 100);
        let a = loud.generate_samples_for_duration(0.001).to_vec();
        let b = quiet.generate_samples_for_duration(0.001).to_vec();
        for (x, y) in a.iter().zip(&b) {
            assert!((x * 0.5 - y).abs() < 1e-6);
        }
    }

    #[test]
    fn track_number_is_stored() {
        let mut inst = instrument(InstrumentConfig::default());
        inst.set_track_number(7);
        assert_eq!(inst.track_number(), 7);
    }

    #[test]
    fn generate_into_writes_to_stream() {
        let mut inst = instrument(InstrumentConfig::default());
        let mut sink: Vec<f32> = Vec::new();
        inst.generate_into(0.001, &mut sink);
        inst.generate_into(0.001, &mut sink);
        assert_eq!(sink.len(), 88);
    }
}
