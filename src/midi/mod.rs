pub mod clock;
pub mod event;
pub mod queue;
pub mod scheduler;

pub use clock::{ClockCorrelation, HostClock, ManualClock, SystemHostClock};
pub use event::{parse_messages, MidiEvent, MidiPacket};
pub use queue::{event_queue, EventReceiver, MidiSender, TimedEvent};
pub use scheduler::Scheduler;
