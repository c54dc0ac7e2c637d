//! loudeq audio engine
//!
//! The processing backend the loudness core is written against:
//! - Audio context: node graph, connect/disconnect, suspended/running
//!   lifecycle with asynchronous resume completion
//! - Nodes: media source (one-time extraction), loudness compressor,
//!   makeup gain, destination
//! - Media elements: host-owned items with capture permission, queued PCM
//!   feeding and play-event notification
//! - Output: cpal stream pulling the shared graph from the render callback

pub mod compressor;
pub mod context;
pub mod gain;
pub mod media;
pub mod output;

pub use compressor::{Compressor, CompressorParams};
pub use context::{AudioContext, ContextState, GraphError, NodeId, SharedGraph, MAX_BLOCK_SIZE};
pub use gain::GainStage;
pub use media::{AudioStream, ExtractError, MediaElement, MediaElementId, QueueWriter};
pub use output::{OutputError, OutputSignal, OutputStream};
