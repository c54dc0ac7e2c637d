//! Media element watching boundary
//!
//! The host owns the actual observation mechanics (DOM mutation callbacks,
//! platform media-session hooks, a test harness). This module is the bridge
//! contract: a channel of detected elements forwarded to the engine in
//! arrival order.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use loudeq_audio::MediaElement;
use tracing::{debug, error};

use crate::engine::{Command, Leveler};

/// Forwards detected media elements into the engine.
///
/// Host contract: push every qualifying element at least once, including
/// the one already present when observation starts (push that one before
/// accepting user input, so the first toggle always finds a binding).
/// Duplicate notifications for the same element are fine; binding collapses
/// them. Element order is preserved, so a bind is always fully applied
/// before any later notification is looked at.
pub struct MediaWatcher {
    thread: Option<JoinHandle<()>>,
}

impl MediaWatcher {
    /// Spawn the forwarding thread. It runs until `elements` closes or the
    /// engine shuts down.
    pub fn attach(leveler: &Leveler, elements: Receiver<MediaElement>) -> Self {
        let cmd_tx = leveler.detect_sender();
        let thread = thread::Builder::new()
            .name("media-watcher".to_string())
            .spawn(move || {
                for element in elements.iter() {
                    if cmd_tx.send(Command::MediaDetected(element)).is_err() {
                        break;
                    }
                }
                debug!("media watcher exiting");
            })
            .expect("failed to spawn media watcher thread");
        Self {
            thread: Some(thread),
        }
    }

    /// Wait for the forwarding thread to finish. Dropping the watcher
    /// without calling this detaches the thread instead; it still exits
    /// once its element source closes.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("media watcher thread panicked");
            }
        }
    }
}
