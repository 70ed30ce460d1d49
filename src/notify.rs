//! Phase-change publication.
//!
//! The coordinator calls [`Notifier::publish`] on every transition; anyone
//! interested (the daemon log, a future push channel to clients) subscribes.
//! Buffering and fan-out policy belong entirely to the subscriber side.

use crate::round::Phase;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize)]
pub struct PhaseChange {
    /// Monotonic round sequence number.
    pub round: u64,
    pub phase: Phase,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<PhaseChange>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn publish(&self, round: u64, phase: Phase) {
        tracing::info!("Round {} entered phase {}", round, phase);
        // A send error just means nobody is listening right now.
        let _ = self.tx.send(PhaseChange { round, phase });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
