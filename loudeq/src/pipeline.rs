//! Audio pipeline
//!
//! Owns the processing chain: context plus the fixed compressor and makeup
//! gain pair in front of the destination. The chain is built lazily on the
//! first binding and exactly once per session; when the output backend is
//! unavailable nothing is ever built and the whole feature quietly stays
//! off.

use loudeq_audio::{AudioContext, CompressorParams, NodeId, SharedGraph};
use tracing::{debug, info, warn};

use crate::config::LevelerConfig;

/// Output backend availability, probed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Available { sample_rate: u32 },
    Unavailable,
}

/// Node ids of the fixed processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNodes {
    pub compressor: NodeId,
    pub gain: NodeId,
    pub destination: NodeId,
}

/// Lazily initialized compressor-then-gain chain.
pub struct AudioPipeline {
    graph: SharedGraph,
    status: EngineStatus,
    params: CompressorParams,
    makeup_gain: f32,
    chain: Option<ChainNodes>,
}

impl AudioPipeline {
    pub fn new(status: EngineStatus, config: &LevelerConfig, graph: SharedGraph) -> Self {
        Self {
            graph,
            status,
            params: config.compressor,
            makeup_gain: config.makeup_gain,
            chain: None,
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, EngineStatus::Available { .. })
    }

    /// The graph slot shared with the output callback.
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Chain ids, if the chain was built already.
    pub fn chain(&self) -> Option<ChainNodes> {
        self.chain
    }

    /// Build the context and chain if they do not exist yet. Idempotent:
    /// later calls return the same ids without touching the graph. Returns
    /// `None` while the backend is unavailable.
    pub fn ensure_initialized(&mut self) -> Option<ChainNodes> {
        if let Some(chain) = self.chain {
            return Some(chain);
        }
        let EngineStatus::Available { sample_rate } = self.status else {
            return None;
        };

        let mut ctx = AudioContext::new(sample_rate);
        let compressor = ctx.add_compressor(self.params);
        let gain = ctx.add_gain(self.makeup_gain);
        let destination = ctx.destination();
        // Wired exactly once for the lifetime of the context
        for (from, to) in [(compressor, gain), (gain, destination)] {
            if let Err(err) = ctx.connect(from, to) {
                warn!(%err, "failed to wire the processing chain");
            }
        }
        info!(sample_rate, "audio context initialized");

        *self.graph.lock() = Some(ctx);
        let chain = ChainNodes {
            compressor,
            gain,
            destination,
        };
        self.chain = Some(chain);
        Some(chain)
    }

    /// Ask the context to resume if it exists and is not running yet.
    /// Returns whether a resume is now pending or already done.
    pub fn request_resume(&self) -> bool {
        let mut slot = self.graph.lock();
        match slot.as_mut() {
            Some(ctx) if !ctx.is_running() => {
                ctx.begin_resume();
                debug!("context resume requested");
                true
            }
            _ => false,
        }
    }

    /// Generation of the current context, if one exists.
    pub fn context_generation(&self) -> Option<u64> {
        self.graph.lock().as_ref().map(|ctx| ctx.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available() -> EngineStatus {
        EngineStatus::Available { sample_rate: 48000 }
    }

    #[test]
    fn test_initialization_is_lazy_and_idempotent() {
        let graph = SharedGraph::default();
        let mut pipeline =
            AudioPipeline::new(available(), &LevelerConfig::default(), graph.clone());

        assert!(pipeline.chain().is_none());
        assert!(graph.lock().is_none());

        let first = pipeline.ensure_initialized().unwrap();
        let second = pipeline.ensure_initialized().unwrap();
        assert_eq!(first, second);

        let slot = graph.lock();
        let ctx = slot.as_ref().unwrap();
        // Destination, compressor, gain; two chain edges
        assert_eq!(ctx.node_count(), 3);
        assert_eq!(ctx.edge_count(), 2);
        assert_eq!(ctx.outgoing(first.compressor), vec![first.gain]);
        assert_eq!(ctx.outgoing(first.gain), vec![first.destination]);
    }

    #[test]
    fn test_unavailable_backend_builds_nothing() {
        let graph = SharedGraph::default();
        let mut pipeline = AudioPipeline::new(
            EngineStatus::Unavailable,
            &LevelerConfig::default(),
            graph.clone(),
        );

        assert!(pipeline.ensure_initialized().is_none());
        assert!(pipeline.ensure_initialized().is_none());
        assert!(graph.lock().is_none());
        assert!(!pipeline.is_available());
    }

    #[test]
    fn test_resume_requests() {
        let mut pipeline = AudioPipeline::new(
            available(),
            &LevelerConfig::default(),
            SharedGraph::default(),
        );

        // No context yet: nothing to resume
        assert!(!pipeline.request_resume());

        pipeline.ensure_initialized().unwrap();
        assert!(pipeline.request_resume());
        // Still pending: asking again is fine
        assert!(pipeline.request_resume());

        // Complete the resume the way the output driver would
        {
            let mut slot = pipeline.graph().lock();
            assert!(slot.as_mut().unwrap().take_resume_transition());
        }
        assert!(!pipeline.request_resume());
    }

    #[test]
    fn test_context_generation_tracks_the_context() {
        let mut pipeline = AudioPipeline::new(
            available(),
            &LevelerConfig::default(),
            SharedGraph::default(),
        );
        assert_eq!(pipeline.context_generation(), None);
        pipeline.ensure_initialized().unwrap();
        assert!(pipeline.context_generation().is_some());
    }
}
