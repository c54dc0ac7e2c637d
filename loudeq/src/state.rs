//! Leveling state machine
//!
//! Single owner of the pipeline, the binding and the router. Every host
//! notification and user action lands here, runs to completion, and leaves
//! the graph in one of the two legal topologies. The control thread drives
//! this type; nothing in here blocks on anything but the graph mutex, which
//! the output callback only ever try-locks.

use std::sync::Arc;

use crossbeam_channel::Sender;
use loudeq_audio::{MediaElement, MediaElementId, NodeId};
use tracing::{debug, info, trace};

use crate::binding::{BindOutcome, MediaBinding};
use crate::pipeline::AudioPipeline;
use crate::router::{GraphRouter, Route};

/// What handling a detected element amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    /// Engine unavailable; the element was left alone.
    Unavailable,
    /// The element was processed; `route` is `None` when no rewire
    /// happened (already bound, or the bind failed).
    Handled {
        bind: BindOutcome,
        route: Option<Route>,
    },
}

/// Result of an enable/disable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableChange {
    pub enabled: bool,
    /// `None` when no source is bound yet, so there was nothing to rewire.
    pub route: Option<Route>,
}

/// Core state: leveling is on by default for every fresh session.
pub struct LevelerState {
    pipeline: AudioPipeline,
    binding: MediaBinding,
    router: GraphRouter,
    enabled: bool,
}

impl LevelerState {
    pub fn new(pipeline: AudioPipeline, play_tx: Sender<MediaElementId>) -> Self {
        Self {
            pipeline,
            binding: MediaBinding::new(play_tx),
            router: GraphRouter::default(),
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_degraded(&self) -> bool {
        !self.pipeline.is_available()
    }

    pub fn bound_element(&self) -> Option<MediaElementId> {
        self.binding.bound_id()
    }

    pub fn bound_source(&self) -> Option<NodeId> {
        self.binding.source()
    }

    pub fn pipeline(&self) -> &AudioPipeline {
        &self.pipeline
    }

    /// React to a detected (or re-detected) media element.
    ///
    /// Builds the pipeline on first use, binds the element and routes its
    /// source for the current enabled state. A re-detection of the bound
    /// element changes nothing. A failed bind leaves routing unestablished
    /// until the next element change; the next toggle or detection lays it
    /// again.
    pub fn handle_element_detected(&mut self, element: &MediaElement) -> DetectOutcome {
        let Some(chain) = self.pipeline.ensure_initialized() else {
            trace!(element = %element.id(), "engine unavailable; ignoring element");
            return DetectOutcome::Unavailable;
        };

        let graph = Arc::clone(self.pipeline.graph());
        let mut slot = graph.lock();
        let Some(ctx) = slot.as_mut() else {
            return DetectOutcome::Unavailable;
        };

        let bind = self.binding.bind(ctx, element);
        let route = match bind {
            BindOutcome::Bound | BindOutcome::Replaced => self
                .binding
                .source()
                .map(|source| self.router.apply(ctx, source, chain, self.enabled)),
            BindOutcome::AlreadyBound | BindOutcome::Failed => None,
        };
        DetectOutcome::Handled { bind, route }
    }

    /// Flip the enabled state and rewire. Inert while degraded.
    pub fn toggle_enabled(&mut self) -> Option<EnableChange> {
        let target = !self.enabled;
        self.set_enabled(target)
    }

    /// Set the enabled state and rewire the bound source to match.
    ///
    /// Setting the current value again is allowed and re-applies the same
    /// routing. Returns `None` while degraded; the flag does not move then.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<EnableChange> {
        if self.is_degraded() {
            debug!(enabled, "engine unavailable; enable request ignored");
            return None;
        }
        self.enabled = enabled;
        let route = self.reroute();
        info!(enabled, ?route, "leveling state changed");
        Some(EnableChange { enabled, route })
    }

    fn reroute(&mut self) -> Option<Route> {
        let chain = self.pipeline.chain()?;
        let source = self.binding.source()?;
        let graph = Arc::clone(self.pipeline.graph());
        let mut slot = graph.lock();
        let ctx = slot.as_mut()?;
        Some(self.router.apply(ctx, source, chain, self.enabled))
    }

    /// A bound element started playing; ask the context to resume if it is
    /// suspended. Play events from superseded elements are ignored.
    pub fn handle_playback_started(&mut self, id: MediaElementId) -> bool {
        if !self.binding.is_current(id) {
            trace!(element = %id, "play event from a superseded element");
            return false;
        }
        self.pipeline.request_resume()
    }

    /// A resume completion arrived from the output driver. Only honored
    /// when it belongs to the context currently in use.
    pub fn handle_resume_completed(&self, generation: u64) -> bool {
        if self.pipeline.context_generation() == Some(generation) {
            debug!(generation, "audio context resumed");
            true
        } else {
            trace!(generation, "resume completion for a superseded context");
            false
        }
    }
}
