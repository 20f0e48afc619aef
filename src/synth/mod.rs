pub mod algorithm;
pub mod config;
pub mod envelope;
pub mod operator;
pub mod patch;
pub mod pool;
pub mod prelude;
pub mod sysex;
pub mod voice;
pub mod waveform;

pub use algorithm::Algorithm;
pub use config::InstrumentConfig;
pub use patch::Patch;
pub use pool::{VoiceHandle, VoicePool};
pub use voice::Voice;
