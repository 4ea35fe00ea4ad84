//! Memory-pressure signalling.
//!
//! The host decides when memory is tight and calls [`PressureNotifier::notify`].
//! Caches and remote adapters subscribe at construction and shed load in
//! response. Nothing here hooks process-global signals.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a memory-pressure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Shed some cached state.
    Moderate,
    /// Shed as much as practical.
    Critical,
}

/// Fan-out channel for pressure signals.
#[derive(Debug, Clone)]
pub struct PressureNotifier {
    sender: broadcast::Sender<PressureLevel>,
}

impl Default for PressureNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureNotifier {
    const CAPACITY: usize = 16;

    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self { sender }
    }

    /// Broadcast a signal. Returns how many subscribers will see it.
    pub fn notify(&self, level: PressureLevel) -> usize {
        log::info!("memory pressure signalled: {level:?}");
        self.sender.send(level).unwrap_or(0)
    }

    /// Subscribe to future signals.
    pub fn subscribe(&self) -> broadcast::Receiver<PressureLevel> {
        self.sender.subscribe()
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
