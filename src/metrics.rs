use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    rounds_started: Arc<AtomicU64>,
    rounds_completed: Arc<AtomicU64>,
    rounds_aborted: Arc<AtomicU64>,
    alices_registered: Arc<AtomicU64>,
    bobs_registered: Arc<AtomicU64>,
    signature_batches: Arc<AtomicU64>,
    rejected_requests: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            rounds_started: Arc::new(AtomicU64::new(0)),
            rounds_completed: Arc::new(AtomicU64::new(0)),
            rounds_aborted: Arc::new(AtomicU64::new(0)),
            alices_registered: Arc::new(AtomicU64::new(0)),
            bobs_registered: Arc::new(AtomicU64::new(0)),
            signature_batches: Arc::new(AtomicU64::new(0)),
            rejected_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn inc_rounds_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_aborted(&self) {
        self.rounds_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alices_registered(&self) {
        self.alices_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bobs_registered(&self) {
        self.bobs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signature_batches(&self) {
        self.signature_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected_requests(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) {
        tracing::info!(
            "Metrics: rounds_started={} completed={} aborted={} alices={} bobs={} sig_batches={} rejected={}",
            self.rounds_started.load(Ordering::Relaxed),
            self.rounds_completed.load(Ordering::Relaxed),
            self.rounds_aborted.load(Ordering::Relaxed),
            self.alices_registered.load(Ordering::Relaxed),
            self.bobs_registered.load(Ordering::Relaxed),
            self.signature_batches.load(Ordering::Relaxed),
            self.rejected_requests.load(Ordering::Relaxed),
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
