//! A `Transport` test double that records every message it receives and can
//! be told to fail a fixed number of times, for exercising the error-budget
//! and retry paths in scenario tests (spec.md §8).

use crate::engine::{OutboundMessage, Transport, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct RecordingTransport {
    name: String,
    sent: Mutex<Vec<OutboundMessage>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// The next `n` calls to `push` return an error instead of recording the
    /// message.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Total `push` calls, successful or not — used to bound how many
    /// deliveries were attempted for a campaign that has since paused or
    /// been cancelled (spec.md §8 S2/S5).
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(
        &self,
        message: OutboundMessage,
        _concurrency_hint: usize,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::from(anyhow::anyhow!(
                "simulated delivery failure"
            )));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) {}
}
