//! Deadline tracking for one published request

use super::events::BusEvent;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Follows the progress events of a single request
///
/// The deadline bounds time without progress. It starts when the request
/// is published and is re-armed when a source starts on the request. While
/// a source still holds the request queued, any activity from that source
/// re-arms it too, so a request waiting behind others never expires while
/// its source keeps working.
#[derive(Debug)]
pub struct ProgressWatch {
    id: u64,
    timeout: Duration,
    deadline: Instant,
    queued: HashSet<String>,
    finished: HashSet<String>,
}

impl ProgressWatch {
    /// Start watching request `id`
    pub fn new(id: u64, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            deadline: Instant::now() + timeout,
            queued: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    /// Account for one bus event
    pub fn observe(&mut self, event: &BusEvent) {
        let rearm = match event {
            BusEvent::RequestQueued { id, source } if *id == self.id => {
                self.queued.insert(source.clone());
                false
            }
            BusEvent::RequestStarted { id, source } if *id == self.id => {
                self.queued.remove(source);
                true
            }
            BusEvent::RequestFinished { id, source } if *id == self.id => {
                self.queued.remove(source);
                self.finished.insert(source.clone());
                false
            }
            BusEvent::RequestStarted { source, .. } | BusEvent::SetActive(source) => {
                self.queued.contains(source)
            }
            _ => false,
        };
        if rearm {
            self.deadline = self.deadline.max(Instant::now() + self.timeout);
        }
    }

    /// When the request expires unless more progress is seen
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Number of sources that have finished handling the request
    pub fn finished(&self) -> usize {
        self.finished.len()
    }
}
