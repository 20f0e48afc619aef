use crate::audio::AudioBackend;
use crate::instrument::FmInstrument;
use crate::synth::prelude::SAMPLE_RATE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Plays an instrument on the default output device. The instrument renders
/// mono; every output channel gets the same sample.
pub struct CpalBackend {
    stream: Option<Stream>,
    instrument: Arc<Mutex<FmInstrument>>,
}

impl CpalBackend {
    pub fn new(instrument: Arc<Mutex<FmInstrument>>) -> Self {
        Self {
            stream: None,
            instrument,
        }
    }

    fn select_output_device(
        &self,
        host: &cpal::Host,
    ) -> Result<cpal::Device, Box<dyn std::error::Error>> {
        if cfg!(target_os = "linux") {
            // Prefer the sound server over raw hw devices.
            for device in host.devices()? {
                let name = device.name().unwrap_or_default().to_lowercase();
                if name.starts_with("default:") || name.contains("pipewire") {
                    return Ok(device);
                }
            }
        }
        host.default_output_device()
            .ok_or_else(|| "No output device available".into())
    }

    fn build_stream(&mut self) -> Result<Stream, Box<dyn std::error::Error>> {
        let host = cpal::default_host();
        let device = self.select_output_device(&host)?;
        info!(device = %device.name().unwrap_or_default(), "selected output device");

        let supported_config = device.default_output_config()?;
        if supported_config.sample_format() != SampleFormat::F32 {
            return Err("Unsupported sample format".into());
        }
        let mut stream_config: cpal::StreamConfig = supported_config.into();
        if stream_config.sample_rate.0 != SAMPLE_RATE {
            warn!(
                device_rate = stream_config.sample_rate.0,
                "device default rate differs, requesting {} Hz", SAMPLE_RATE
            );
            stream_config.sample_rate = cpal::SampleRate(SAMPLE_RATE);
        }

        let channels = stream_config.channels as usize;
        let instrument = self.instrument.clone();
        let mut mono: Vec<f32> = Vec::new();

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                match instrument.lock() {
                    Ok(mut instrument) => instrument.render(&mut mono),
                    Err(_) => mono.fill(0.0),
                }
                for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                    frame.fill(*sample);
                }
            },
            |err| error!(%err, "output stream error"),
            None,
        )?;

        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let stream = self.build_stream()?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(stream) = &self.stream {
            stream.pause()?;
        }
        Ok(())
    }
}
