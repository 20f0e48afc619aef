//! Render cost of the instrument at typical host block sizes.
//!
//! Run with: cargo bench
//!
//! Reference deadlines at 44.1kHz:
//!   - 64 samples  = 1.45ms
//!   - 256 samples = 5.80ms
//!   - 512 samples = 11.61ms

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fminstrument::synth::algorithm::Algorithm;
use fminstrument::synth::operator::OperatorParams;
use fminstrument::synth::sysex;
use fminstrument::{FmInstrument, InstrumentConfig, ManualClock, MidiPacket, Patch};

const BLOCK_SIZES: &[usize] = &[64, 256, 512];

fn six_op_stack() -> Patch {
    let mut operators = vec![OperatorParams::default(); 6];
    for (i, op) in operators.iter_mut().enumerate() {
        op.coarse = (i + 1) as u8;
        op.level = 80;
    }
    operators[5].feedback = 5;
    Patch::new("BENCH", operators, Algorithm::stack(6).unwrap()).unwrap()
}

fn instrument(patch: &Patch, polyphony: usize) -> FmInstrument {
    let config = InstrumentConfig {
        polyphony,
        ..InstrumentConfig::default()
    };
    FmInstrument::with_config(&sysex::encode(patch), config, Arc::new(ManualClock::new(1)))
        .unwrap()
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    let stack = six_op_stack();

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        let mut single = instrument(&stack, 16);
        single.write_midi_note(60, 100);
        group.bench_with_input(BenchmarkId::new("one_voice_6op", size), &size, |b, _| {
            b.iter(|| single.render(black_box(&mut buffer)))
        });

        let mut full = instrument(&stack, 16);
        for note in 48..64 {
            full.write_midi_note(note, 100);
        }
        group.bench_with_input(BenchmarkId::new("sixteen_voices_6op", size), &size, |b, _| {
            b.iter(|| full.render(black_box(&mut buffer)))
        });
    }
    group.finish();
}

fn bench_scheduling(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    let mut inst = instrument(&Patch::sine(), 16);
    let sender = inst.midi_sender();
    let mut buffer = vec![0.0f32; 256];

    group.bench_function("block_with_32_events", |b| {
        b.iter(|| {
            for i in 0..32u8 {
                let _ = sender.enqueue(&MidiPacket::note_on(0, 0, 40 + i, 100));
                let _ = sender.enqueue(&MidiPacket::note_off(0, 0, 40 + i));
            }
            inst.render(black_box(&mut buffer));
        })
    });
    group.finish();
}

criterion_group!(benches, bench_render, bench_scheduling);
criterion_main!(benches);
