use crate::midi::{HostClock, MidiPacket, MidiSender};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use std::error::Error;
use std::io::{stdin, stdout, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// Forwards a hardware MIDI input port into an instrument's event queue.
///
/// Each message is stamped with the instrument's host clock plus a fixed
/// latency, so events land at a steady offset inside the next audio blocks
/// instead of snapping to block boundaries.
pub struct MidiHandler {
    /// Holds the connection to keep it alive
    #[allow(dead_code)]
    connection: Option<MidiInputConnection<()>>,
}

impl MidiHandler {
    pub fn new(sender: MidiSender, clock: Arc<dyn HostClock>, latency_ticks: u64) -> Self {
        match Self::try_new(sender, clock, latency_ticks) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("Failed to initialize MIDI: {e}. MIDI input will be disabled.");
                Self { connection: None }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn try_new(
        sender: MidiSender,
        clock: Arc<dyn HostClock>,
        latency_ticks: u64,
    ) -> Result<Self, Box<dyn Error>> {
        let mut midi_in = MidiInput::new("fminstrument input")?;
        midi_in.ignore(Ignore::TimeAndActiveSense);
        let port = Self::select_input_port(&midi_in)?;
        let port_name = midi_in.port_name(&port)?;

        let connection = midi_in.connect(
            &port,
            "fminstrument-read-input",
            move |_, message, _| {
                let packet = MidiPacket::new(clock.now() + latency_ticks, message.to_vec());
                if let Err(e) = sender.enqueue(&packet) {
                    warn!("{e}");
                }
            },
            (),
        )?;

        info!(port = %port_name, "opened MIDI port");

        Ok(Self {
            connection: Some(connection),
        })
    }

    fn select_input_port(midi_in: &MidiInput) -> Result<MidiInputPort, Box<dyn Error>> {
        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            return Err("No MIDI input ports found".into());
        }
        if in_ports.len() == 1 {
            return Ok(in_ports[0].clone());
        }

        println!("Available MIDI input ports:");
        for (i, port) in in_ports.iter().enumerate() {
            println!("{}: {}", i, midi_in.port_name(port)?);
        }

        print!("Select MIDI input port: ");
        stdout().flush()?;
        let mut input = String::new();
        stdin().read_line(&mut input)?;
        let selection = input.trim().parse::<usize>().unwrap_or(0);

        let port = in_ports
            .get(selection)
            .ok_or("Invalid MIDI port selection")?
            .clone();

        Ok(port)
    }
}
