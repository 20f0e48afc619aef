//! FM synthesis instrument with a sample-accurate MIDI scheduler.
//!
//! A patch arrives as a system-exclusive message, notes arrive as timestamped
//! MIDI packets, and audio leaves as mono `f32` blocks at [`SAMPLE_RATE`].

pub mod error;
pub mod instrument;
pub mod midi;
pub mod synth;

#[cfg(feature = "native")]
pub mod audio;
#[cfg(feature = "native")]
pub mod input;

pub use error::{
    ConfigError, InstrumentError, MalformedSysexError, SchedulingOverflowError, SysexErrorKind,
};
pub use instrument::{AudioStream, FmInstrument};
pub use midi::{HostClock, ManualClock, MidiEvent, MidiPacket, MidiSender, SystemHostClock};
pub use synth::prelude::SAMPLE_RATE;
pub use synth::{InstrumentConfig, Patch};
