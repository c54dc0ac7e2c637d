//! Graph routing
//!
//! Decides where the media source feeds: through the compressor chain when
//! leveling is enabled, straight to the destination when it is not. A
//! routing pass is transactional in effect; the source always ends up with
//! exactly one outgoing edge, so the two paths can never be live at once.

use loudeq_audio::{AudioContext, NodeId};
use tracing::{debug, warn};

use crate::pipeline::ChainNodes;

/// Which path the source was routed onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Source feeds the compressor chain.
    Processed,
    /// Source feeds the destination directly.
    Bypassed,
}

/// Applies the enabled/bypassed topology to a bound source.
#[derive(Default)]
pub struct GraphRouter;

impl GraphRouter {
    /// Rewire `source` for the current `enabled` state.
    ///
    /// Tears down every outgoing edge of the source first, then lays the
    /// single edge for the selected path. Safe to call when the source's
    /// routing already matches; the result is the same topology.
    pub fn apply(
        &self,
        ctx: &mut AudioContext,
        source: NodeId,
        chain: ChainNodes,
        enabled: bool,
    ) -> Route {
        let removed = ctx.disconnect_outputs(source);
        if removed > 0 {
            debug!(source = source.raw(), removed, "released previous routing");
        }

        let (target, route) = if enabled {
            (chain.compressor, Route::Processed)
        } else {
            (chain.destination, Route::Bypassed)
        };
        if let Err(err) = ctx.connect(source, target) {
            warn!(source = source.raw(), %err, "routing connect failed");
        }
        debug!(source = source.raw(), enabled, ?route, "routing applied");
        route
    }
}
