use super::clock::{ClockCorrelation, HostClock};
use super::event::MidiEvent;
use super::queue::{EventReceiver, TimedEvent};
use crate::synth::pool::VoicePool;
use crate::synth::sysex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Render-side half of the MIDI path. Pulls events from the queue, maps their
/// timestamps onto the block being rendered and applies each one to the
/// voice pool at its exact sample offset.
pub struct Scheduler {
    receiver: EventReceiver,
    clock: Arc<dyn HostClock>,
    correlation: ClockCorrelation,
    pending: Vec<TimedEvent>,
    capacity: usize,
    sample_position: u64,
}

impl Scheduler {
    pub fn new(
        receiver: EventReceiver,
        clock: Arc<dyn HostClock>,
        ticks_per_second: u64,
        sample_rate: f32,
    ) -> Self {
        let capacity = receiver.capacity();
        Self {
            receiver,
            clock,
            correlation: ClockCorrelation::new(ticks_per_second, sample_rate),
            pending: Vec::with_capacity(capacity * 2),
            capacity,
            sample_position: 0,
        }
    }

    /// Renders one block, reading the host clock for the block start.
    pub fn render_block(&mut self, pool: &mut VoicePool, out: &mut [f32]) {
        let now = self.clock.now();
        self.render_block_at(pool, out, Some(now));
    }

    /// Renders one block. `observed_host_time` is the host time of the first
    /// sample when the caller knows it; `None` continues from the previous
    /// block.
    ///
    /// Samples before an event's offset are rendered with the voice state
    /// prior to the event, samples from the offset on with the state after
    /// it. Events past the end of the block stay queued.
    pub fn render_block_at(
        &mut self,
        pool: &mut VoicePool,
        out: &mut [f32],
        observed_host_time: Option<u64>,
    ) {
        self.correlation
            .resync(observed_host_time, self.sample_position);
        self.receiver.drain_into(&mut self.pending);
        self.enforce_capacity();

        let block_len = out.len() as u64;
        let mut cursor = 0usize;
        let mut applied = 0usize;
        for timed in self.pending.iter() {
            let offset = self.correlation.offset_for(timed.timestamp);
            if offset >= block_len {
                break;
            }
            let offset = offset as usize;
            if offset > cursor {
                pool.tick(&mut out[cursor..offset]);
                cursor = offset;
            }
            trace!(offset, event = ?timed.event, "dispatch");
            apply_event(pool, &timed.event);
            applied += 1;
        }
        pool.tick(&mut out[cursor..]);
        self.pending.drain(..applied);
        self.sample_position += block_len;
    }

    /// Keeps at most `capacity` droppable events pending. The earliest
    /// note-on goes first, together with the note-off that would have ended
    /// it. Other events are dropped, oldest first, only when no note-on is
    /// left. Patch changes are exempt.
    fn enforce_capacity(&mut self) {
        let mut droppable = self.pending.iter().filter(|e| e.event.is_droppable()).count();
        while droppable > self.capacity {
            let oldest_note_on = self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, e)| matches!(e.event, MidiEvent::NoteOn { .. }))
                .min_by_key(|(_, e)| e.sequence)
                .map(|(i, _)| i);
            let index = match oldest_note_on {
                Some(i) => i,
                None => {
                    let oldest = self
                        .pending
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| e.event.is_droppable())
                        .min_by_key(|(_, e)| e.sequence)
                        .map(|(i, _)| i);
                    let Some(i) = oldest else { break };
                    i
                }
            };
            let dropped = self.pending.remove(index);
            self.receiver.count_drop();
            droppable -= 1;
            warn!(event = ?dropped.event, "pending MIDI events over capacity, dropping oldest");

            if let MidiEvent::NoteOn { channel, note, .. } = dropped.event {
                if let Some(off) = self.matching_note_off(index, channel, note) {
                    self.pending.remove(off);
                    self.receiver.count_drop();
                    droppable -= 1;
                }
            }
        }
    }

    /// The next note-off for `note` at or after `from`, unless another
    /// note-on for it comes first.
    fn matching_note_off(&self, from: usize, channel: u8, note: u8) -> Option<usize> {
        for (i, timed) in self.pending.iter().enumerate().skip(from) {
            match timed.event {
                MidiEvent::NoteOff {
                    channel: c,
                    note: n,
                } if c == channel && n == note => return Some(i),
                MidiEvent::NoteOn {
                    channel: c,
                    note: n,
                    ..
                } if c == channel && n == note => return None,
                _ => {}
            }
        }
        None
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Samples rendered since construction.
    pub fn sample_position(&self) -> u64 {
        self.sample_position
    }

    pub fn correlation(&self) -> &ClockCorrelation {
        &self.correlation
    }

    pub fn dropped_count(&self) -> u64 {
        self.receiver.dropped_count()
    }
}

/// Applies one event to the pool. Undecodable patches are logged and ignored.
pub fn apply_event(pool: &mut VoicePool, event: &MidiEvent) {
    match event {
        MidiEvent::NoteOn { note, velocity, .. } => {
            pool.note_on(*note, *velocity as f32);
        }
        MidiEvent::NoteOff { note, .. } => {
            pool.release(*note);
        }
        MidiEvent::ControlChange {
            controller, value, ..
        } => pool.control_change(*controller, *value),
        MidiEvent::SysexPatch(bytes) => match sysex::decode(bytes) {
            Ok(patch) => {
                debug!(name = patch.name(), "applying sysex patch");
                pool.set_patch(Arc::new(patch));
            }
            Err(e) => warn!(error = %e, "ignoring sysex message"),
        },
    }
}
