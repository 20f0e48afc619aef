use fminstrument::audio::{AudioBackend, CpalBackend};
use fminstrument::input::MidiHandler;
use fminstrument::synth::sysex;
use fminstrument::{FmInstrument, HostClock, InstrumentConfig, Patch, SystemHostClock};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const USAGE: &str = "usage: fminstrument [PATCH.syx] [CONFIG.json]";

/// Scheduling latency for live input, in host clock ticks.
const LIVE_LATENCY_MICROS: u64 = 5_000;
const MICROS_PER_SECOND: u64 = 1_000_000;

/// Live input is stamped by `SystemHostClock`, which counts microseconds.
fn live_config(config: InstrumentConfig) -> InstrumentConfig {
    if config.clock_ticks_per_second != MICROS_PER_SECOND {
        warn!(
            configured = config.clock_ticks_per_second,
            "clock_ticks_per_second ignored for live input, using microseconds"
        );
    }
    InstrumentConfig {
        clock_ticks_per_second: MICROS_PER_SECOND,
        ..config
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let patch_bytes = match args.next() {
        Some(arg) if arg == "-h" || arg == "--help" => {
            println!("{USAGE}");
            return Ok(());
        }
        Some(path) => std::fs::read(path)?,
        None => sysex::encode(&Patch::sine()),
    };
    let config = match args.next() {
        Some(path) => InstrumentConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => InstrumentConfig::default(),
    };

    let config = live_config(config);
    let clock: Arc<dyn HostClock> = Arc::new(SystemHostClock::new());
    let instrument = FmInstrument::with_config(&patch_bytes, config, clock.clone())?;
    info!(patch = instrument.patch().name(), "loaded patch");
    let sender = instrument.midi_sender();
    let instrument = Arc::new(Mutex::new(instrument));

    let mut audio_backend = CpalBackend::new(instrument.clone());
    audio_backend.start()?;

    // Dropping the handler closes the port, so keep it until exit.
    let midi_handler = MidiHandler::new(sender, clock, LIVE_LATENCY_MICROS);
    if !midi_handler.is_connected() {
        info!("no MIDI input, playing a test note");
        if let Ok(mut instrument) = instrument.lock() {
            instrument.write_midi_note(69, 100);
        }
    }

    println!("Press Enter to quit.");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    audio_backend.stop()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_config_uses_microseconds_and_keeps_other_settings() {
        let config = InstrumentConfig {
            polyphony: 4,
            clock_ticks_per_second: 44_100,
            ..InstrumentConfig::default()
        };
        let live = live_config(config);
        assert_eq!(live.clock_ticks_per_second, MICROS_PER_SECOND);
        assert_eq!(live.polyphony, 4);
    }
}
