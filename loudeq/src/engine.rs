//! Control engine
//!
//! `Leveler` is the host-facing handle. `start` spawns the control thread,
//! which owns the graph, the binding and the output stream; every
//! notification and user action is a message processed there in arrival
//! order, one at a time, so a toggle can never interleave with a detection
//! or with another toggle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use loudeq_audio::{MediaElement, MediaElementId, OutputSignal, OutputStream, SharedGraph};
use tracing::{debug, error, info, warn};

use crate::binding::BindOutcome;
use crate::config::LevelerConfig;
use crate::pipeline::{AudioPipeline, EngineStatus};
use crate::router::Route;
use crate::state::{DetectOutcome, EnableChange, LevelerState};

/// Command queue depth; enough headroom for detection bursts.
const COMMAND_CAPACITY: usize = 64;

/// Resume signals from the output callback; at most one per resume.
const SIGNAL_CAPACITY: usize = 16;

/// Play notifications fan in from every element that was ever bound.
const PLAY_CAPACITY: usize = 64;

/// Messages from host-facing handles to the control thread.
pub(crate) enum Command {
    MediaDetected(MediaElement),
    SetEnabled(bool),
    Toggle,
    Shutdown,
}

/// Notifications for the embedding host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelerEvent {
    /// The output stream is running at the given rate.
    Ready { sample_rate: u32 },
    /// No output device; the leveler is permanently inert this session.
    Degraded,
    /// A media element was bound, replacing a previous one or not.
    Bound {
        element: MediaElementId,
        replaced: bool,
    },
    /// A second extraction was attempted on an already-extracted element;
    /// the previous binding stays in effect.
    ExtractionConflict { element: MediaElementId },
    /// A routing pass finished with the given result.
    RoutingApplied { route: Route, enabled: bool },
    /// The audio context finished resuming.
    ContextResumed,
}

/// Handle to the leveling engine.
///
/// Methods are cheap and never block; they queue work for the control
/// thread. Dropping the last handle shuts the engine down and joins it.
pub struct Leveler {
    cmd_tx: Sender<Command>,
    event_rx: Receiver<LevelerEvent>,
    enabled: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Leveler {
    /// Spawn the control thread and open the audio output.
    ///
    /// Never fails: when no output device exists the engine comes up
    /// degraded and every operation is inert.
    pub fn start(config: LevelerConfig) -> Self {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_CAPACITY);
        let (event_tx, event_rx) = bounded(config.event_capacity);
        let enabled = Arc::new(AtomicBool::new(true));
        let degraded = Arc::new(AtomicBool::new(false));

        let thread = {
            let enabled = Arc::clone(&enabled);
            let degraded = Arc::clone(&degraded);
            thread::Builder::new()
                .name("loudeq-engine".to_string())
                .spawn(move || run_engine(config, cmd_rx, event_tx, enabled, degraded))
                .expect("failed to spawn engine thread")
        };

        Self {
            cmd_tx,
            event_rx,
            enabled,
            degraded,
            thread: Some(thread),
        }
    }

    /// Announce a detected (or re-detected) media element.
    pub fn notify_media_element(&self, element: MediaElement) {
        self.send(Command::MediaDetected(element));
    }

    /// Flip the leveling state.
    pub fn toggle_enabled(&self) {
        self.send(Command::Toggle);
    }

    /// Set the leveling state explicitly.
    pub fn set_enabled(&self, enabled: bool) {
        self.send(Command::SetEnabled(enabled));
    }

    /// Last applied leveling state, for surfacing in UI.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether the engine came up without an output device.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Host-facing notifications. Events are dropped rather than queued
    /// unboundedly when nobody drains them.
    pub fn events(&self) -> &Receiver<LevelerEvent> {
        &self.event_rx
    }

    /// Sender used by the watcher to forward detected elements.
    pub(crate) fn detect_sender(&self) -> Sender<Command> {
        self.cmd_tx.clone()
    }

    /// Stop the control thread and wait for it.
    pub fn shutdown(self) {}

    fn send(&self, cmd: Command) {
        let _ = self.cmd_tx.try_send(cmd);
    }
}

impl Drop for Leveler {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}

fn run_engine(
    config: LevelerConfig,
    cmd_rx: Receiver<Command>,
    event_tx: Sender<LevelerEvent>,
    enabled: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
) {
    let graph = SharedGraph::default();
    let (signal_tx, signal_rx) = bounded::<OutputSignal>(SIGNAL_CAPACITY);
    let (play_tx, play_rx) = bounded::<MediaElementId>(PLAY_CAPACITY);

    let (status, output) = match OutputStream::open(Arc::clone(&graph), signal_tx) {
        Ok(output) => {
            info!(
                sample_rate = output.sample_rate(),
                channels = output.channels(),
                "output stream running"
            );
            let _ = event_tx.try_send(LevelerEvent::Ready {
                sample_rate: output.sample_rate(),
            });
            let status = EngineStatus::Available {
                sample_rate: output.sample_rate(),
            };
            (status, Some(output))
        }
        Err(err) => {
            warn!(%err, "audio output unavailable; leveling disabled");
            degraded.store(true, Ordering::Relaxed);
            let _ = event_tx.try_send(LevelerEvent::Degraded);
            (EngineStatus::Unavailable, None)
        }
    };
    // Without a stream the signal sender is gone; a closed channel would
    // spin the select loop
    let signal_rx = if output.is_some() { signal_rx } else { never() };

    let mut state = LevelerState::new(AudioPipeline::new(status, &config, graph), play_tx);

    loop {
        select! {
            recv(cmd_rx) -> cmd => match cmd {
                Ok(Command::MediaDetected(element)) => {
                    handle_detected(&mut state, &element, &event_tx);
                }
                Ok(Command::Toggle) => {
                    apply_enable(state.toggle_enabled(), &enabled, &event_tx);
                }
                Ok(Command::SetEnabled(on)) => {
                    apply_enable(state.set_enabled(on), &enabled, &event_tx);
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(play_rx) -> id => {
                if let Ok(id) = id {
                    if state.handle_playback_started(id) {
                        debug!(element = %id, "context resume requested");
                    }
                }
            }
            recv(signal_rx) -> signal => {
                if let Ok(OutputSignal::Resumed { generation }) = signal {
                    if state.handle_resume_completed(generation) {
                        let _ = event_tx.try_send(LevelerEvent::ContextResumed);
                    }
                }
            }
        }
    }

    drop(output);
    debug!("engine thread exiting");
}

fn handle_detected(
    state: &mut LevelerState,
    element: &MediaElement,
    event_tx: &Sender<LevelerEvent>,
) {
    let DetectOutcome::Handled { bind, route } = state.handle_element_detected(element) else {
        return;
    };
    match bind {
        BindOutcome::Bound | BindOutcome::Replaced => {
            let _ = event_tx.try_send(LevelerEvent::Bound {
                element: element.id(),
                replaced: bind == BindOutcome::Replaced,
            });
        }
        BindOutcome::Failed => {
            let _ = event_tx.try_send(LevelerEvent::ExtractionConflict {
                element: element.id(),
            });
        }
        BindOutcome::AlreadyBound => {}
    }
    if let Some(route) = route {
        let _ = event_tx.try_send(LevelerEvent::RoutingApplied {
            route,
            enabled: state.is_enabled(),
        });
    }
}

fn apply_enable(
    change: Option<EnableChange>,
    enabled: &AtomicBool,
    event_tx: &Sender<LevelerEvent>,
) {
    let Some(change) = change else {
        return;
    };
    enabled.store(change.enabled, Ordering::Relaxed);
    if let Some(route) = change.route {
        let _ = event_tx.try_send(LevelerEvent::RoutingApplied {
            route,
            enabled: change.enabled,
        });
    }
}
