use crate::synth::sysex::{SYSEX_END, SYSEX_START};

const STATUS_NOTE_OFF: u8 = 0x80;
const STATUS_NOTE_ON: u8 = 0x90;
const STATUS_CONTROL_CHANGE: u8 = 0xB0;

/// A MIDI message the instrument acts on, decoded once at the packet boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Complete framed message, 0xF0 through 0xF7.
    SysexPatch(Vec<u8>),
}

impl MidiEvent {
    /// Whether the scheduler may discard this event when its queue is full.
    /// Patch changes are never dropped.
    pub fn is_droppable(&self) -> bool {
        !matches!(self, MidiEvent::SysexPatch(_))
    }
}

/// Raw bytes from a MIDI source with the host clock time they arrived at.
/// A timestamp of 0 means "as soon as possible".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPacket {
    pub timestamp: u64,
    pub data: Vec<u8>,
}

impl MidiPacket {
    pub fn new(timestamp: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            data: data.into(),
        }
    }

    pub fn note_on(timestamp: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            timestamp,
            [STATUS_NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        )
    }

    pub fn note_off(timestamp: u64, channel: u8, note: u8) -> Self {
        Self::new(
            timestamp,
            [STATUS_NOTE_OFF | (channel & 0x0F), note & 0x7F, 0],
        )
    }

    pub fn control_change(timestamp: u64, channel: u8, controller: u8, value: u8) -> Self {
        Self::new(
            timestamp,
            [
                STATUS_CONTROL_CHANGE | (channel & 0x0F),
                controller & 0x7F,
                value & 0x7F,
            ],
        )
    }

    pub fn events(&self) -> Vec<MidiEvent> {
        parse_messages(&self.data)
    }
}

/// Data bytes following a channel status byte.
fn channel_data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Data bytes following a system common status byte.
fn system_common_data_len(status: u8) -> usize {
    match status {
        0xF1 | 0xF3 => 1,
        0xF2 => 2,
        _ => 0,
    }
}

/// Splits a packet into events. Running status is honoured; messages the
/// instrument does not use, real-time bytes, stray data bytes and truncated
/// messages are skipped rather than reported.
pub fn parse_messages(data: &[u8]) -> Vec<MidiEvent> {
    let mut events = Vec::new();
    let mut running: Option<u8> = None;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];

        if byte >= 0xF8 {
            // real-time bytes may appear anywhere and do not cancel running status
            i += 1;
            continue;
        }

        if byte == SYSEX_START {
            running = None;
            match data[i + 1..].iter().position(|&b| b == SYSEX_END) {
                Some(len) => {
                    let end = i + 1 + len;
                    events.push(MidiEvent::SysexPatch(data[i..=end].to_vec()));
                    i = end + 1;
                }
                None => break, // unterminated
            }
            continue;
        }

        if byte >= 0xF1 {
            running = None;
            i += 1 + system_common_data_len(byte);
            continue;
        }

        let status = if byte & 0x80 != 0 {
            running = Some(byte);
            i += 1;
            byte
        } else {
            match running {
                Some(status) => status,
                None => {
                    i += 1;
                    continue;
                }
            }
        };

        let len = channel_data_len(status);
        if i + len > data.len() {
            break;
        }
        let payload = &data[i..i + len];
        if let Some(pos) = payload.iter().position(|&b| b & 0x80 != 0) {
            // a new status byte interrupted this message
            i += pos;
            continue;
        }
        i += len;

        let channel = status & 0x0F;
        match status & 0xF0 {
            STATUS_NOTE_ON if payload[1] == 0 => events.push(MidiEvent::NoteOff {
                channel,
                note: payload[0],
            }),
            STATUS_NOTE_ON => events.push(MidiEvent::NoteOn {
                channel,
                note: payload[0],
                velocity: payload[1],
            }),
            STATUS_NOTE_OFF => events.push(MidiEvent::NoteOff {
                channel,
                note: payload[0],
            }),
            STATUS_CONTROL_CHANGE => events.push(MidiEvent::ControlChange {
                channel,
                controller: payload[0],
                value: payload[1],
            }),
            _ => {}
        }
    }
    events
}
