use fminstrument::synth::algorithm::Algorithm;
use fminstrument::synth::operator::OperatorParams;
use fminstrument::synth::prelude::note_frequency;
use fminstrument::synth::sysex;
use fminstrument::{
    FmInstrument, InstrumentConfig, InstrumentError, ManualClock, MidiPacket, Patch,
    SysexErrorKind,
};
use std::sync::Arc;

fn sine_instrument(config: InstrumentConfig) -> FmInstrument {
    FmInstrument::with_config(
        &sysex::encode(&Patch::sine()),
        config,
        Arc::new(ManualClock::new(1)),
    )
    .unwrap()
}

#[test]
fn test_note_frequency_matches_equal_temperament() {
    for n in 0..=127u8 {
        let expected = 440.0 * 2f64.powf((n as f64 - 69.0) / 12.0);
        let actual = note_frequency(n) as f64;
        assert!(
            ((actual - expected) / expected).abs() < 1e-6,
            "note {n}: {actual} vs {expected}"
        );
    }
}

#[test]
fn test_one_period_of_a4() {
    let mut inst = sine_instrument(InstrumentConfig::default());
    inst.write_midi_note(69, 128);
    let out = inst.generate_samples_for_duration(1.0 / 440.0);

    assert_eq!(out.len(), 100);
    let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!((peak - 1.0).abs() < 0.02, "peak {peak}");
    assert!(out[0].abs() < 1e-3, "first sample {}", out[0]);
    assert!(out[99].abs() < 0.1, "last sample {}", out[99]);
    assert!(out[25] > 0.95);
    assert!(out[75] < -0.95);
    // One full cycle: a single upward and a single downward zero crossing.
    let downward = out.windows(2).filter(|w| w[0] > 0.0 && w[1] <= 0.0).count();
    assert_eq!(downward, 1);
}

#[test]
fn test_construction_reports_malformed_patch() {
    let mut bytes = sysex::encode(&Patch::sine());
    let last_data = bytes.len() - 3;
    bytes[last_data] ^= 0x01;
    match FmInstrument::new(&bytes) {
        Err(InstrumentError::Sysex(e)) => {
            assert!(matches!(e.kind, SysexErrorKind::Checksum { .. }))
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("corrupt patch accepted"),
    }
}

#[test]
fn test_polyphony_bound_steals_oldest() {
    let mut inst = sine_instrument(InstrumentConfig {
        polyphony: 4,
        ..InstrumentConfig::default()
    });
    for note in 60..65 {
        inst.write_midi_note(note, 100);
        assert!(inst.active_voices() <= 4);
    }

    // Slot 0 held the oldest note (60) and now carries 64 behind a short fade.
    let slot0 = &inst.pool().voices()[0];
    assert!(slot0.has_pending());
    inst.generate_samples_for_duration(0.01);
    let notes: Vec<u8> = inst.pool().voices().iter().map(|v| v.note()).collect();
    assert_eq!(notes, vec![64, 61, 62, 63]);
    assert_eq!(inst.active_voices(), 4);
}

#[test]
fn test_release_twice_is_noop() {
    let mut patch_ops = vec![OperatorParams::default()];
    patch_ops[0].envelope.release = 20;
    let patch = Patch::new("SLOWREL", patch_ops, Algorithm::default()).unwrap();
    let mut inst = FmInstrument::with_config(
        &sysex::encode(&patch),
        InstrumentConfig::default(),
        Arc::new(ManualClock::new(1)),
    )
    .unwrap();

    inst.write_midi_note(60, 100);
    inst.generate_samples_for_duration(0.01);
    inst.write_midi_note(60, 0);
    let level_after_first = inst.pool().voices()[0].level();
    inst.write_midi_note(60, 0);
    assert_eq!(inst.pool().voices()[0].level(), level_after_first);
    assert!(inst.pool().voices()[0].is_releasing());
    assert_eq!(inst.active_voices(), 1);
}

#[test]
fn test_sysex_packet_switches_patch_for_new_notes() {
    let mut inst = sine_instrument(InstrumentConfig::default());
    let ops = vec![OperatorParams::default(); 2];
    let other = Patch::new("TWO OP", ops, Algorithm::stack(2).unwrap()).unwrap();

    inst.enqueue_midi_packet(&MidiPacket::new(0, sysex::encode(&other)))
        .unwrap();
    inst.enqueue_midi_packet(&MidiPacket::note_on(0, 0, 60, 100))
        .unwrap();
    inst.generate_samples_for_duration(0.001);

    assert_eq!(inst.patch().name(), "TWO OP");
    assert_eq!(inst.pool().voices()[0].operator_states().len(), 2);
}

#[test]
fn test_bad_sysex_packet_is_ignored() {
    let mut inst = sine_instrument(InstrumentConfig::default());
    inst.enqueue_midi_packet(&MidiPacket::new(0, vec![0xF0, 0x7D, 0x00, 0xF7]))
        .unwrap();
    inst.generate_samples_for_duration(0.001);
    assert_eq!(inst.patch().name(), Patch::sine().name());
}

#[test]
fn test_config_from_json() {
    let config = InstrumentConfig::from_json(r#"{ "polyphony": 2, "master_volume": 0.25 }"#)
        .unwrap();
    let mut inst = sine_instrument(config);
    assert_eq!(inst.pool().capacity(), 2);
    inst.write_midi_note(69, 127);
    let peak = inst
        .generate_samples_for_duration(0.01)
        .iter()
        .fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak < 0.26 && peak > 0.2, "peak {peak}");
}
