//! Leveler configuration
//!
//! Plain construction-time settings. Nothing here is persisted: the enable
//! state intentionally resets every session.

use loudeq_audio::CompressorParams;

/// Default makeup gain: unity. The compressor only evens levels out, it
/// does not boost the program.
pub const DEFAULT_MAKEUP_GAIN: f32 = 1.0;

/// Default capacity of the event channel surfaced to the host.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings for a [`crate::Leveler`].
#[derive(Debug, Clone)]
pub struct LevelerConfig {
    /// Compression curve of the processing chain.
    pub compressor: CompressorParams,
    /// Gain applied after compression.
    pub makeup_gain: f32,
    /// Capacity of the host-facing event channel. Events beyond it are
    /// dropped, never blocked on.
    pub event_capacity: usize,
}

impl Default for LevelerConfig {
    fn default() -> Self {
        Self {
            compressor: CompressorParams::default(),
            makeup_gain: DEFAULT_MAKEUP_GAIN,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
