//! Media element handles
//!
//! A [`MediaElement`] stands for one playable media item owned by the host:
//! it carries the item's decoded audio stream, a capture permission flag and
//! play-event notification. The audio stream can be extracted into the graph
//! exactly once per element; a second extraction is the modeled conflict the
//! binding layer has to recover from.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use thiserror::Error;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a media element.
///
/// Identity, not equality of content: two elements playing the same item are
/// still distinct elements, which is what binding decisions key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaElementId(u64);

impl MediaElementId {
    /// The raw id value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MediaElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media-{}", self.0)
    }
}

/// Why a source extraction was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    /// The element's stream was already extracted once.
    #[error("audio stream already extracted from this element")]
    AlreadyExtracted,
    /// The element does not permit audio capture.
    #[error("element does not permit audio capture")]
    CaptureDenied,
}

/// Decoded audio supplied by the host.
///
/// `read` fills `buf` with interleaved stereo samples and returns how many
/// were written. Anything short of `buf.len()` means the stream is idle or
/// exhausted for now; the caller zero-fills the remainder.
pub trait AudioStream: Send {
    fn read(&mut self, buf: &mut [f32]) -> usize;
}

/// Stream that never produces samples. Used for elements whose audio is
/// silent or not yet known.
struct SilenceStream;

impl AudioStream for SilenceStream {
    fn read(&mut self, _buf: &mut [f32]) -> usize {
        0
    }
}

struct ElementShared {
    id: MediaElementId,
    label: String,
    capture_allowed: AtomicBool,
    extracted: AtomicBool,
    stream: Mutex<Option<Box<dyn AudioStream>>>,
    play_listeners: Mutex<Vec<Sender<MediaElementId>>>,
}

/// Cloneable handle to one playable media item.
///
/// Clones share identity and state, the way multiple references to the same
/// host object would.
#[derive(Clone)]
pub struct MediaElement {
    shared: Arc<ElementShared>,
}

impl MediaElement {
    /// Create an element around a host-provided audio stream. Capture is
    /// not permitted until someone enables it.
    pub fn new(label: impl Into<String>, stream: Box<dyn AudioStream>) -> Self {
        let id = MediaElementId(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(ElementShared {
                id,
                label: label.into(),
                capture_allowed: AtomicBool::new(false),
                extracted: AtomicBool::new(false),
                stream: Mutex::new(Some(stream)),
                play_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an element with a silent stream.
    pub fn silent(label: impl Into<String>) -> Self {
        Self::new(label, Box::new(SilenceStream))
    }

    /// Create an element fed through a queue: the returned writer accepts
    /// interleaved stereo samples from any thread, the element's stream
    /// hands them to the renderer in order.
    pub fn queued(label: impl Into<String>, capacity: usize) -> (Self, QueueWriter) {
        let rb = HeapRb::<f32>::new(capacity.max(2));
        let (prod, cons) = rb.split();
        let element = Self::new(label, Box::new(QueueStream { cons }));
        (element, QueueWriter { prod })
    }

    pub fn id(&self) -> MediaElementId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Whether `other` is this same element (identity, not content).
    pub fn same_element(&self, other: &MediaElement) -> bool {
        self.shared.id == other.shared.id
    }

    /// Whether audio capture is permitted.
    pub fn allows_capture(&self) -> bool {
        self.shared.capture_allowed.load(Ordering::Acquire)
    }

    /// Permit or forbid audio capture. Has no effect on an already
    /// extracted stream.
    pub fn set_allow_capture(&self, allow: bool) {
        self.shared.capture_allowed.store(allow, Ordering::Release);
    }

    /// Whether the stream was already extracted.
    pub fn is_extracted(&self) -> bool {
        self.shared.extracted.load(Ordering::Acquire)
    }

    /// Take the element's stream. At most one caller ever succeeds.
    pub(crate) fn take_stream(&self) -> Result<Box<dyn AudioStream>, ExtractError> {
        if !self.allows_capture() {
            return Err(ExtractError::CaptureDenied);
        }
        if self.shared.extracted.swap(true, Ordering::AcqRel) {
            return Err(ExtractError::AlreadyExtracted);
        }
        self.shared
            .stream
            .lock()
            .take()
            .ok_or(ExtractError::AlreadyExtracted)
    }

    /// Register a play-event listener. Listeners receive this element's id
    /// on every play notification and are never removed; a listener whose
    /// receiver is gone is simply skipped.
    pub fn add_play_listener(&self, listener: Sender<MediaElementId>) {
        self.shared.play_listeners.lock().push(listener);
    }

    /// Number of registered play listeners.
    pub fn play_listener_count(&self) -> usize {
        self.shared.play_listeners.lock().len()
    }

    /// Announce that playback started on this element. Non-blocking: full
    /// or disconnected listeners are skipped, a later play event will
    /// reach them again.
    pub fn notify_play(&self) {
        let id = self.shared.id;
        for listener in self.shared.play_listeners.lock().iter() {
            let _ = listener.try_send(id);
        }
    }
}

impl fmt::Debug for MediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaElement")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .field("extracted", &self.is_extracted())
            .finish()
    }
}

/// Producer half of a queued media element; see [`MediaElement::queued`].
pub struct QueueWriter {
    prod: HeapProd<f32>,
}

impl QueueWriter {
    /// Append interleaved stereo samples, returning how many were accepted
    /// (the queue may be full).
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.prod.push_slice(samples)
    }

    /// Free space in the queue, in samples.
    pub fn vacant_len(&self) -> usize {
        self.prod.vacant_len()
    }
}

/// Consumer half backing a queued element's stream.
struct QueueStream {
    cons: HeapCons<f32>,
}

impl AudioStream for QueueStream {
    fn read(&mut self, buf: &mut [f32]) -> usize {
        self.cons.pop_slice(buf)
    }
}
