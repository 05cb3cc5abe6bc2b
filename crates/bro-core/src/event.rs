//! Notifications emitted by a mining session.

use std::collections::VecDeque;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::state::{MiningMode, MiningState};

/// Lifecycle phases reported through [`MiningEvent::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningStatus {
    Starting,
    Resumed,
    Mining,
    /// GPU unavailable or failing; the session continues on CPU
    FallbackToCpu,
    /// A GPU batch failed and will be retried after a backoff
    Retrying,
    Stopped,
    /// The nonce space is exhausted
    Completed,
}

/// Periodic progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub current_nonce: u64,
    pub current_hash: String,
    pub current_leading_zeros: u32,
    pub best_hash: String,
    pub best_nonce: u64,
    pub best_leading_zeros: u32,
    /// Approximate hashes per second since the session started.
    pub hash_rate: f64,
    pub elapsed_ms: u64,
    pub mode: MiningMode,
}

impl ProgressReport {
    pub(crate) fn from_state(
        state: &MiningState,
        current_nonce: u64,
        current_leading_zeros: u32,
        hash_rate: f64,
        elapsed_ms: u64,
    ) -> Self {
        ProgressReport {
            current_nonce,
            current_hash: state.current_hash.clone(),
            current_leading_zeros,
            best_hash: state.best_hash.clone(),
            best_nonce: state.best_nonce,
            best_leading_zeros: state.best_leading_zeros,
            hash_rate,
            elapsed_ms,
            mode: state.mode,
        }
    }
}

/// One entry of the session's event stream.
///
/// Events are queued in emission order: progress reports have increasing
/// nonces, and a `BestHash` is always queued before the progress report that
/// first shows the same best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiningEvent {
    Status {
        status: MiningStatus,
        mode: MiningMode,
        message: String,
    },
    BestHash {
        hash: String,
        nonce: u64,
        leading_zeros: u32,
        /// Reward this hash would earn at the time it was found.
        reward: u64,
    },
    Progress(ProgressReport),
}

/// Bounded FIFO of pending events.
///
/// When full, the oldest progress report is dropped to make room; later
/// reports supersede it. Status and best-hash events are only dropped when
/// nothing but them is queued.
#[derive(Debug, Clone)]
pub struct EventQueue {
    events: VecDeque<MiningEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: MiningEvent) {
        if self.events.len() >= self.capacity {
            let oldest_progress = self
                .events
                .iter()
                .position(|e| matches!(e, MiningEvent::Progress(_)));
            match oldest_progress {
                Some(index) => {
                    self.events.remove(index);
                }
                None => {
                    self.events.pop_front();
                }
            }
            if self.dropped == 0 {
                warn!("event queue full ({} events), dropping oldest; drain it more often", self.capacity);
            }
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take every queued event in emission order.
    pub fn drain(&mut self) -> Vec<MiningEvent> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Hashes per second over `elapsed_ms`.
pub fn hash_rate(hashes: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    hashes as f64 / (elapsed_ms as f64 / 1000.0)
}

/// Format a hash rate for display.
pub fn format_hash_rate(rate: f64) -> String {
    if rate >= 1_000_000_000.0 {
        format!("{:.2} GH/s", rate / 1_000_000_000.0)
    } else if rate >= 1_000_000.0 {
        format!("{:.2} MH/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2} KH/s", rate / 1_000.0)
    } else {
        format!("{:.2} H/s", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Challenge;

    #[test]
    fn test_hash_rate() {
        assert_eq!(hash_rate(1_000, 0), 0.0);
        assert_eq!(hash_rate(1_000, 500), 2_000.0);
        assert_eq!(format_hash_rate(2_000.0), "2.00 KH/s");
        assert_eq!(format_hash_rate(3_500_000_000.0), "3.50 GH/s");
        assert_eq!(format_hash_rate(12.0), "12.00 H/s");
    }

    fn progress(nonce: u64) -> MiningEvent {
        let mut state = MiningState::new(Challenge::new("abc", 0).unwrap(), MiningMode::Cpu);
        state.current_nonce = nonce;
        MiningEvent::Progress(ProgressReport::from_state(&state, nonce, 0, 0.0, 0))
    }

    fn status(message: &str) -> MiningEvent {
        MiningEvent::Status {
            status: MiningStatus::Mining,
            mode: MiningMode::Cpu,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_full_queue_drops_oldest_progress() {
        let mut queue = EventQueue::new(3);
        queue.push(status("started"));
        queue.push(progress(10));
        queue.push(progress(20));
        queue.push(progress(30));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain(), vec![status("started"), progress(20), progress(30)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_without_progress_drops_oldest() {
        let mut queue = EventQueue::new(2);
        queue.push(status("a"));
        queue.push(status("b"));
        queue.push(status("c"));
        assert_eq!(queue.drain(), vec![status("b"), status("c")]);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = MiningEvent::Status {
            status: MiningStatus::FallbackToCpu,
            mode: MiningMode::Cpu,
            message: "no gpu".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"status\":\"fallback_to_cpu\""));
    }
}
