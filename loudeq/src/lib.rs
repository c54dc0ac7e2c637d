//! Loudness leveling for host media playback
//!
//! Inserts a dynamics compressor between a host's media elements and the
//! audio output, toggleable at runtime and automatically re-attached when
//! the host replaces its media element:
//! - Leveler: engine handle; spawns the control thread that owns the graph
//! - MediaWatcher: bridge from host element detection into the engine
//! - LevelerState: the single-threaded core, usable directly for embedding
//! - AudioPipeline / MediaBinding / GraphRouter: pipeline construction,
//!   one-time source extraction, exclusive processed/bypassed routing

mod binding;
mod config;
mod engine;
mod pipeline;
mod router;
mod state;
mod watcher;

pub use binding::{BindOutcome, MediaBinding};
pub use config::{LevelerConfig, DEFAULT_MAKEUP_GAIN};
pub use engine::{Leveler, LevelerEvent};
pub use pipeline::{AudioPipeline, ChainNodes, EngineStatus};
pub use router::{GraphRouter, Route};
pub use state::{DetectOutcome, EnableChange, LevelerState};
pub use watcher::MediaWatcher;

pub use loudeq_audio::{
    AudioContext, AudioStream, CompressorParams, ExtractError, MediaElement, MediaElementId,
    QueueWriter, SharedGraph,
};
