//! Media binding
//!
//! Tracks which media element currently feeds the graph. At most one
//! element is bound at a time; binding a new one releases the previous
//! source. Source extraction is one-shot per element, so a re-detected old
//! element cannot be re-extracted: that conflict is recoverable and leaves
//! the previous binding in charge.

use crossbeam_channel::Sender;
use loudeq_audio::{AudioContext, MediaElement, MediaElementId, NodeId};
use tracing::{debug, info, warn};

/// What a bind attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The element is already the current binding; nothing changed.
    AlreadyBound,
    /// A first binding was established.
    Bound,
    /// The element replaced a previous binding.
    Replaced,
    /// Extraction failed; the previous binding (if any) was kept.
    Failed,
}

struct BoundSource {
    element: MediaElement,
    source: NodeId,
}

/// Unbound, or bound to exactly one element and its source node.
pub struct MediaBinding {
    bound: Option<BoundSource>,
    play_tx: Sender<MediaElementId>,
}

impl MediaBinding {
    /// `play_tx` is handed to every bound element as its play listener;
    /// the control thread drains the other end.
    pub fn new(play_tx: Sender<MediaElementId>) -> Self {
        Self {
            bound: None,
            play_tx,
        }
    }

    /// Identity of the currently bound element.
    pub fn bound_id(&self) -> Option<MediaElementId> {
        self.bound.as_ref().map(|b| b.element.id())
    }

    /// Source node of the current binding.
    pub fn source(&self) -> Option<NodeId> {
        self.bound.as_ref().map(|b| b.source)
    }

    /// Whether `id` is the currently bound element.
    pub fn is_current(&self, id: MediaElementId) -> bool {
        self.bound_id() == Some(id)
    }

    /// Bind `element` as the graph's media source.
    ///
    /// Binding the current element again is a no-op. Otherwise the previous
    /// source is disconnected first; its node is only removed once the new
    /// extraction succeeded, so a conflict can fall back to it and the next
    /// routing pass reconnects it.
    pub fn bind(&mut self, ctx: &mut AudioContext, element: &MediaElement) -> BindOutcome {
        if let Some(bound) = &self.bound {
            if bound.element.same_element(element) {
                debug!(element = %element.id(), "element already bound");
                return BindOutcome::AlreadyBound;
            }
        }

        let had_prior = if let Some(bound) = &self.bound {
            let removed = ctx.disconnect_outputs(bound.source);
            debug!(
                element = %bound.element.id(),
                removed,
                "disconnected previous source"
            );
            true
        } else {
            false
        };

        // Extraction is blocked while the element forbids capture
        if !element.allows_capture() {
            element.set_allow_capture(true);
        }

        let source = match ctx.create_media_source(element) {
            Ok(node) => node,
            Err(err) => {
                warn!(
                    element = %element.id(),
                    %err,
                    "source extraction failed; keeping previous binding"
                );
                return BindOutcome::Failed;
            }
        };

        if let Some(old) = self.bound.take() {
            ctx.remove_node(old.source);
        }
        element.add_play_listener(self.play_tx.clone());
        info!(element = %element.id(), label = element.label(), "bound media element");
        self.bound = Some(BoundSource {
            element: element.clone(),
            source,
        });

        if had_prior {
            BindOutcome::Replaced
        } else {
            BindOutcome::Bound
        }
    }
}
