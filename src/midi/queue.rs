//! Lock-free hand-off of MIDI events from the thread that receives them to
//! the render thread.
//!
//! Note-ons go through a bounded ring. When it is full the oldest note-on is
//! evicted and reported back to the producer. Note-offs and control changes
//! have a ring of their own, so a burst of new notes never pushes out the
//! release of a sounding one. Sysex patch changes use a separate unbounded
//! queue so they are never lost. Every event
//! carries a sequence number so the consumer can restore arrival order across
//! both queues.

use super::event::{MidiEvent, MidiPacket};
use crate::error::SchedulingOverflowError;
use crossbeam_queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An event with its host timestamp and arrival sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub timestamp: u64,
    pub sequence: u64,
    pub event: MidiEvent,
}

impl TimedEvent {
    pub fn sort_key(&self) -> (u64, u64) {
        (self.timestamp, self.sequence)
    }
}

struct Shared {
    note_ons: ArrayQueue<TimedEvent>,
    releases: ArrayQueue<TimedEvent>,
    patches: SegQueue<TimedEvent>,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

/// Producer handle. Cheap to clone; every method is non-blocking.
#[derive(Clone)]
pub struct MidiSender {
    shared: Arc<Shared>,
}

/// Consumer handle, owned by the scheduler.
pub struct EventReceiver {
    shared: Arc<Shared>,
}

/// Creates a connected sender/receiver pair. `capacity` bounds the number of
/// in-flight note-ons, and separately the in-flight note-offs and control
/// changes.
pub fn event_queue(capacity: usize) -> (MidiSender, EventReceiver) {
    let shared = Arc::new(Shared {
        note_ons: ArrayQueue::new(capacity.max(1)),
        releases: ArrayQueue::new(capacity.max(1)),
        patches: SegQueue::new(),
        sequence: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        MidiSender {
            shared: shared.clone(),
        },
        EventReceiver { shared },
    )
}

impl MidiSender {
    /// Decodes a packet and queues each event it contains. All events are
    /// queued even if some evict older ones; the error reports the first
    /// event that was dropped.
    pub fn enqueue(&self, packet: &MidiPacket) -> Result<(), SchedulingOverflowError> {
        let mut result = Ok(());
        for event in packet.events() {
            if let Err(e) = self.enqueue_event(packet.timestamp, event) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn enqueue_event(
        &self,
        timestamp: u64,
        event: MidiEvent,
    ) -> Result<(), SchedulingOverflowError> {
        let timed = TimedEvent {
            timestamp,
            sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed),
            event,
        };
        if !timed.event.is_droppable() {
            self.shared.patches.push(timed);
            return Ok(());
        }
        let lane = if matches!(timed.event, MidiEvent::NoteOn { .. }) {
            &self.shared.note_ons
        } else {
            &self.shared.releases
        };
        match lane.force_push(timed) {
            None => Ok(()),
            Some(evicted) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SchedulingOverflowError {
                    dropped: evicted.event,
                })
            }
        }
    }

    /// Events discarded by the queue so far.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl EventReceiver {
    /// Moves every queued event into `pending`, keeping it sorted by
    /// timestamp and then arrival.
    pub fn drain_into(&self, pending: &mut Vec<TimedEvent>) -> usize {
        let mut moved = 0;
        while let Some(event) = self
            .shared
            .patches
            .pop()
            .or_else(|| self.shared.releases.pop())
            .or_else(|| self.shared.note_ons.pop())
        {
            let key = event.sort_key();
            let pos = pending.partition_point(|e| e.sort_key() <= key);
            pending.insert(pos, event);
            moved += 1;
        }
        moved
    }

    pub fn capacity(&self) -> usize {
        self.shared.note_ons.capacity()
    }

    pub(crate) fn count_drop(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
