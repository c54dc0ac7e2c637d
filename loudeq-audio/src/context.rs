//! Audio processing context
//!
//! A small directed graph of audio nodes rendered in dependency order:
//! media sources feed processing nodes which feed the destination. The
//! context also carries the playback lifecycle: it starts suspended (no
//! audio flows until a qualifying playback event asks for a resume) and the
//! output driver completes the resume asynchronously from the render
//! callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::compressor::{Compressor, CompressorParams};
use crate::gain::GainStage;
use crate::media::{AudioStream, ExtractError, MediaElement, MediaElementId};

/// Maximum samples (interleaved stereo) per render block.
pub const MAX_BLOCK_SIZE: usize = 4096;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Opaque node identity within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The raw id value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Playback lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet allowed to produce audio.
    Suspended,
    /// A resume was requested; the output driver completes it.
    Resuming,
    /// Audio flows.
    Running,
}

/// Graph manipulation errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    /// An endpoint does not exist in this context.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    /// A node cannot feed itself.
    #[error("a node cannot be connected to itself")]
    SelfEdge,
}

enum NodeKind {
    Source {
        element: MediaElementId,
        stream: Box<dyn AudioStream>,
    },
    Compressor(Compressor),
    Gain(GainStage),
    Destination,
}

struct Node {
    kind: NodeKind,
    buf: Vec<f32>,
}

/// Shared handle to the render graph. The control side mutates it under the
/// lock; the output callback try-locks and renders silence on contention.
/// `None` until the processing chain is first initialized.
pub type SharedGraph = Arc<Mutex<Option<AudioContext>>>;

/// Node graph plus lifecycle state, rendered one block at a time.
pub struct AudioContext {
    sample_rate: u32,
    state: ContextState,
    generation: u64,
    next_node: u32,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<(NodeId, NodeId)>,
    order: Vec<NodeId>,
    order_dirty: bool,
    destination: NodeId,
    mix: Vec<f32>,
}

impl AudioContext {
    /// Create a suspended context containing only the destination node.
    pub fn new(sample_rate: u32) -> Self {
        let mut ctx = Self {
            sample_rate,
            state: ContextState::Suspended,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            next_node: 0,
            nodes: HashMap::new(),
            edges: Vec::new(),
            order: Vec::new(),
            order_dirty: true,
            destination: NodeId(0),
            mix: vec![0.0; MAX_BLOCK_SIZE],
        };
        ctx.destination = ctx.insert(NodeKind::Destination);
        ctx
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ContextState::Running)
    }

    /// Process-unique identity of this context, used to match asynchronous
    /// resume completions against the context they belong to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The output sink every audible path ends at.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                buf: vec![0.0; MAX_BLOCK_SIZE],
            },
        );
        self.order_dirty = true;
        id
    }

    /// Insert a compressor node with the given curve.
    pub fn add_compressor(&mut self, params: CompressorParams) -> NodeId {
        let comp = Compressor::new(self.sample_rate as f32, params);
        self.insert(NodeKind::Compressor(comp))
    }

    /// Insert a flat gain node.
    pub fn add_gain(&mut self, gain: f32) -> NodeId {
        self.insert(NodeKind::Gain(GainStage::new(gain)))
    }

    /// Extract the element's audio stream into a source node. Succeeds at
    /// most once per element for the element's whole lifetime.
    pub fn create_media_source(&mut self, element: &MediaElement) -> Result<NodeId, ExtractError> {
        let stream = element.take_stream()?;
        Ok(self.insert(NodeKind::Source {
            element: element.id(),
            stream,
        }))
    }

    /// The element a source node was extracted from.
    pub fn source_element(&self, node: NodeId) -> Option<MediaElementId> {
        match self.nodes.get(&node)?.kind {
            NodeKind::Source { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Add a directed connection. Connecting an already connected pair is a
    /// no-op, matching the collapse semantics of the underlying model.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if from == to {
            return Err(GraphError::SelfEdge);
        }
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::UnknownNode(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode(to));
        }
        if self.edges.contains(&(from, to)) {
            return Ok(());
        }
        self.edges.push((from, to));
        self.order_dirty = true;
        Ok(())
    }

    /// Remove every outgoing connection of `node`, returning how many were
    /// removed. Total: a node without connections (or an unknown node) is
    /// simply zero work, never an error.
    pub fn disconnect_outputs(&mut self, node: NodeId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|(from, _)| *from != node);
        let removed = before - self.edges.len();
        if removed > 0 {
            self.order_dirty = true;
        }
        removed
    }

    /// Remove a node and every connection touching it. Total in the same
    /// sense as [`disconnect_outputs`]; the destination cannot be removed.
    ///
    /// [`disconnect_outputs`]: AudioContext::disconnect_outputs
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        if node == self.destination {
            return false;
        }
        if self.nodes.remove(&node).is_none() {
            return false;
        }
        self.edges.retain(|(from, to)| *from != node && *to != node);
        self.order_dirty = true;
        true
    }

    /// Targets of `node`'s outgoing connections.
    pub fn outgoing(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Snapshot of all connections.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.edges.clone()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Ask for a resume. Only a suspended context changes state; the
    /// transition completes when the output driver picks it up.
    pub fn begin_resume(&mut self) {
        if matches!(self.state, ContextState::Suspended) {
            self.state = ContextState::Resuming;
        }
    }

    /// Driver side of [`begin_resume`]: completes a pending resume and
    /// reports whether one was completed. Called from the render callback
    /// at the start of a block.
    ///
    /// [`begin_resume`]: AudioContext::begin_resume
    pub fn take_resume_transition(&mut self) -> bool {
        if matches!(self.state, ContextState::Resuming) {
            self.state = ContextState::Running;
            true
        } else {
            false
        }
    }

    /// Render one buffer of interleaved stereo. Suspended contexts render
    /// silence without touching any source.
    pub fn render(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(MAX_BLOCK_SIZE) {
            self.render_block(chunk);
        }
    }

    fn render_block(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if !self.is_running() {
            return;
        }
        if self.order_dirty {
            self.rebuild_order();
        }

        let len = out.len();
        let order = std::mem::take(&mut self.order);
        {
            let Self {
                nodes, edges, mix, ..
            } = self;
            for id in order.iter() {
                // Sum this node's inputs
                mix[..len].fill(0.0);
                for (from, to) in edges.iter() {
                    if to != id {
                        continue;
                    }
                    if let Some(src) = nodes.get(from) {
                        for (acc, sample) in mix[..len].iter_mut().zip(&src.buf[..len]) {
                            *acc += *sample;
                        }
                    }
                }
                let Some(node) = nodes.get_mut(id) else { continue };
                match &mut node.kind {
                    NodeKind::Source { stream, .. } => {
                        let n = stream.read(&mut node.buf[..len]);
                        node.buf[n..len].fill(0.0);
                    }
                    NodeKind::Compressor(comp) => {
                        node.buf[..len].copy_from_slice(&mix[..len]);
                        comp.process(&mut node.buf[..len]);
                    }
                    NodeKind::Gain(stage) => {
                        node.buf[..len].copy_from_slice(&mix[..len]);
                        stage.process(&mut node.buf[..len]);
                    }
                    NodeKind::Destination => {
                        out.copy_from_slice(&mix[..len]);
                    }
                }
            }
        }
        self.order = order;
    }

    /// Recompute the dependency order (Kahn). A graph that fails to sort
    /// has a cycle; it renders silence until the cycle is broken.
    fn rebuild_order(&mut self) {
        let mut indegree: HashMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for (_, to) in &self.edges {
            if let Some(d) = indegree.get_mut(to) {
                *d += 1;
            }
        }

        let mut order: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        order.sort_by_key(|id| id.raw());

        let mut i = 0;
        while i < order.len() {
            let id = order[i];
            i += 1;
            for (from, to) in &self.edges {
                if *from != id {
                    continue;
                }
                if let Some(d) = indegree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        order.push(*to);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            warn!("audio graph has a cycle; muting output");
            order.clear();
        }
        self.order = order;
        self.order_dirty = false;
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaElement;

    fn running_context(sample_rate: u32) -> AudioContext {
        let mut ctx = AudioContext::new(sample_rate);
        ctx.begin_resume();
        assert!(ctx.take_resume_transition());
        ctx
    }

    fn captured_queued(label: &str, capacity: usize) -> (MediaElement, crate::media::QueueWriter) {
        let (element, writer) = MediaElement::queued(label, capacity);
        element.set_allow_capture(true);
        (element, writer)
    }

    #[test]
    fn test_new_context_is_suspended() {
        let ctx = AudioContext::new(48000);
        assert_eq!(ctx.state(), ContextState::Suspended);
        assert_eq!(ctx.node_count(), 1);
        assert!(ctx.contains(ctx.destination()));
    }

    #[test]
    fn test_generations_are_unique() {
        let a = AudioContext::new(48000);
        let b = AudioContext::new(48000);
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn test_resume_lifecycle() {
        let mut ctx = AudioContext::new(48000);
        assert!(!ctx.take_resume_transition(), "nothing to complete yet");

        ctx.begin_resume();
        assert_eq!(ctx.state(), ContextState::Resuming);
        assert!(ctx.take_resume_transition());
        assert_eq!(ctx.state(), ContextState::Running);

        // Re-requesting and re-completing are both no-ops now
        ctx.begin_resume();
        assert_eq!(ctx.state(), ContextState::Running);
        assert!(!ctx.take_resume_transition());
    }

    #[test]
    fn test_connect_rules() {
        let mut ctx = AudioContext::new(48000);
        let g1 = ctx.add_gain(1.0);
        let g2 = ctx.add_gain(1.0);

        assert!(ctx.connect(g1, g2).is_ok());
        assert_eq!(ctx.edge_count(), 1);

        // Duplicates collapse
        assert!(ctx.connect(g1, g2).is_ok());
        assert_eq!(ctx.edge_count(), 1);

        assert_eq!(ctx.connect(g1, g1), Err(GraphError::SelfEdge));

        ctx.remove_node(g2);
        assert_eq!(ctx.connect(g1, g2), Err(GraphError::UnknownNode(g2)));
    }

    #[test]
    fn test_disconnect_is_total() {
        let mut ctx = AudioContext::new(48000);
        let g1 = ctx.add_gain(1.0);

        // Disconnecting an unconnected node is zero work, not an error
        assert_eq!(ctx.disconnect_outputs(g1), 0);

        ctx.connect(g1, ctx.destination()).unwrap();
        assert_eq!(ctx.disconnect_outputs(g1), 1);
        assert_eq!(ctx.edge_count(), 0);
        assert_eq!(ctx.disconnect_outputs(g1), 0);
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut ctx = AudioContext::new(48000);
        let g1 = ctx.add_gain(1.0);
        let g2 = ctx.add_gain(1.0);
        ctx.connect(g1, g2).unwrap();
        ctx.connect(g2, ctx.destination()).unwrap();

        assert!(ctx.remove_node(g2));
        assert!(!ctx.contains(g2));
        assert_eq!(ctx.edge_count(), 0);

        // Total: removing again is just false
        assert!(!ctx.remove_node(g2));
        // The destination is not removable
        assert!(!ctx.remove_node(ctx.destination()));
    }

    #[test]
    fn test_suspended_context_renders_silence() {
        let mut ctx = AudioContext::new(48000);
        let (element, mut writer) = captured_queued("video", 16);
        writer.push(&[0.5, 0.5, 0.5, 0.5]);

        let source = ctx.create_media_source(&element).unwrap();
        ctx.connect(source, ctx.destination()).unwrap();

        let mut out = [1.0f32; 8];
        ctx.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        // The queue was not consumed while suspended
        ctx.begin_resume();
        ctx.take_resume_transition();
        ctx.render(&mut out);
        assert_eq!(&out[..4], &[0.5, 0.5, 0.5, 0.5]);
        assert!(out[4..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_source_to_destination_passthrough() {
        let mut ctx = running_context(48000);
        let (element, mut writer) = captured_queued("video", 32);
        writer.push(&[0.1, 0.2, 0.3, 0.4]);

        let source = ctx.create_media_source(&element).unwrap();
        assert_eq!(ctx.source_element(source), Some(element.id()));
        ctx.connect(source, ctx.destination()).unwrap();

        let mut out = [0.0f32; 8];
        ctx.render(&mut out);
        assert_eq!(&out[..4], &[0.1, 0.2, 0.3, 0.4]);
        assert!(out[4..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_chain_reduces_loud_source() {
        let mut ctx = running_context(48000);
        let (element, mut writer) = captured_queued("video", 8192);
        let loud = vec![0.9f32; 4096];
        assert_eq!(writer.push(&loud), 4096);

        let source = ctx.create_media_source(&element).unwrap();
        let comp = ctx.add_compressor(CompressorParams::default());
        let gain = ctx.add_gain(1.0);
        ctx.connect(source, comp).unwrap();
        ctx.connect(comp, gain).unwrap();
        ctx.connect(gain, ctx.destination()).unwrap();

        let mut out = vec![0.0f32; 4096];
        ctx.render(&mut out);

        let tail = out[out.len() - 1].abs();
        assert!(tail < 0.05, "expected compressed output, got {tail}");
    }

    #[test]
    fn test_cycle_is_muted_not_fatal() {
        let mut ctx = running_context(48000);
        let g1 = ctx.add_gain(1.0);
        let g2 = ctx.add_gain(1.0);
        ctx.connect(g1, g2).unwrap();
        ctx.connect(g2, g1).unwrap();

        let mut out = [1.0f32; 4];
        ctx.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_disconnected_source_is_silent_at_destination() {
        let mut ctx = running_context(48000);
        let (element, mut writer) = captured_queued("video", 16);
        writer.push(&[0.7, 0.7]);

        let source = ctx.create_media_source(&element).unwrap();
        ctx.connect(source, ctx.destination()).unwrap();
        ctx.disconnect_outputs(source);

        let mut out = [0.5f32; 4];
        ctx.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}
