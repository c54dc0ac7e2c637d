//! Real-time audio output
//!
//! Owns the cpal output stream that pulls the shared render graph. The
//! callback never blocks: when the graph lock is contended or no context
//! exists yet it writes silence. Pending context resumes are completed here
//! and reported back to the control thread over a signal channel, which is
//! what makes a resume an asynchronous operation with a later completion.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{error, info};

use crate::context::{SharedGraph, MAX_BLOCK_SIZE};

/// Why the output backend could not be opened.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to query output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Start(#[from] cpal::PlayStreamError),
}

/// Signals posted from the audio callback to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSignal {
    /// A pending resume completed; carries the generation of the context
    /// it completed for.
    Resumed { generation: u64 },
}

/// Live output stream. Dropping it stops playback.
///
/// cpal streams are not `Send` on every platform, so the stream is opened
/// on the thread that keeps it for its whole lifetime.
pub struct OutputStream {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream {
    /// Open the default output device and start pulling `graph`.
    pub fn open(graph: SharedGraph, signals: Sender<OutputSignal>) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(device = %name, sample_rate, channels, "opening audio output");

        let stream_config: cpal::StreamConfig = config.into();
        let stream = if channels == 2 {
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| render_callback(&graph, &signals, data),
                |err| error!("audio output stream error: {err}"),
                None,
            )?
        } else {
            // Render stereo and spread it over whatever the device has
            let ch = channels.max(1) as usize;
            let mut scratch = vec![0.0f32; MAX_BLOCK_SIZE];
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    let frames = data.len() / ch;
                    let needed = frames * 2;
                    if scratch.len() < needed {
                        scratch.resize(needed, 0.0);
                    }
                    render_callback(&graph, &signals, &mut scratch[..needed]);
                    for (frame, pair) in data.chunks_mut(ch).zip(scratch.chunks(2)) {
                        spread_frame(frame, pair[0], pair[1]);
                    }
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )?
        };
        stream.play()?;

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
        })
    }

    /// Sample rate of the opened device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the opened device.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// One callback pass: complete a pending resume, then render.
fn render_callback(graph: &SharedGraph, signals: &Sender<OutputSignal>, out: &mut [f32]) {
    match graph.try_lock() {
        Some(mut slot) => match slot.as_mut() {
            Some(ctx) => {
                if ctx.take_resume_transition() {
                    let _ = signals.try_send(OutputSignal::Resumed {
                        generation: ctx.generation(),
                    });
                }
                ctx.render(out);
            }
            None => out.fill(0.0),
        },
        None => out.fill(0.0),
    }
}

/// Write a stereo pair into one device frame: mono gets the average, wider
/// layouts get left/right up front and silence on the extras.
fn spread_frame(frame: &mut [f32], left: f32, right: f32) {
    match frame.len() {
        0 => {}
        1 => frame[0] = (left + right) * 0.5,
        _ => {
            frame[0] = left;
            frame[1] = right;
            for sample in &mut frame[2..] {
                *sample = 0.0;
            }
        }
    }
}
