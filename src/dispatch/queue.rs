use crate::core::types::{Alert, Confidence};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const QUEUE_DEPTH: usize = 256;
const DEDUP_WINDOW: Duration = Duration::from_secs(30);
/// Dedup-map sweep threshold; entries older than the window are dropped.
const DEDUP_GC_LEN: usize = 1024;

/// What happened to an alert offered to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    /// Same (asset, signal-kind-set) admitted within the dedup window.
    Deduplicated,
    /// Queue full; the oldest MEDIUM alert made room.
    EvictedOldestMedium,
    /// Queue full of HIGH alerts; the incoming alert was dropped.
    DroppedIncoming,
}

/// Bounded FIFO with per-market dedup. Overflow never evicts a HIGH alert in
/// favor of a newcomer: the oldest MEDIUM goes first, else the incoming alert
/// is the one dropped.
pub struct AlertQueue {
    queue: VecDeque<Alert>,
    last_admitted: HashMap<(String, u8), Instant>,
    depth: usize,
    dedup_window: Duration,
}

impl AlertQueue {
    pub fn new() -> AlertQueue {
        Self::with_limits(QUEUE_DEPTH, DEDUP_WINDOW)
    }

    pub fn with_limits(depth: usize, dedup_window: Duration) -> AlertQueue {
        Self {
            queue: VecDeque::new(),
            last_admitted: HashMap::new(),
            depth,
            dedup_window,
        }
    }

    pub fn push(&mut self, alert: Alert) -> Admission {
        let now = Instant::now();
        let key = (alert.trade.asset_id.clone(), alert.kind_mask());

        if let Some(last) = self.last_admitted.get(&key) {
            if now.duration_since(*last) < self.dedup_window {
                return Admission::Deduplicated;
            }
        }
        if self.last_admitted.len() > DEDUP_GC_LEN {
            let window = self.dedup_window;
            self.last_admitted
                .retain(|_, t| now.duration_since(*t) < window);
        }

        let mut admission = Admission::Enqueued;
        if self.queue.len() >= self.depth {
            match self
                .queue
                .iter()
                .position(|a| a.confidence == Confidence::Medium)
            {
                Some(idx) => {
                    self.queue.remove(idx);
                    admission = Admission::EvictedOldestMedium;
                }
                None => return Admission::DroppedIncoming,
            }
        }

        self.last_admitted.insert(key, now);
        self.queue.push_back(alert);
        admission
    }

    pub fn pop(&mut self) -> Option<Alert> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outcome, Side, Signal, Trade};

    fn alert(asset: &str, confidence: Confidence, signal: Signal) -> Alert {
        Alert {
            trade: Trade {
                asset_id: asset.to_string(),
                side: Side::Buy,
                outcome: Outcome::Yes,
                price: 0.5,
                size: 10_000.0,
                wallet: "0xa".to_string(),
                timestamp_ms: 0,
                trade_id: "t".to_string(),
            },
            signals: vec![signal],
            confidence,
            market_title: "m".to_string(),
            market_slug: None,
            end_time: None,
            wallet_tx_count: None,
            midpoint: None,
        }
    }

    fn whale() -> Signal {
        Signal::Whale { usd_value: 12_000.0, multiplier: None }
    }

    #[test]
    fn test_dedup_same_asset_and_kinds() {
        let mut q = AlertQueue::new();
        assert_eq!(q.push(alert("a1", Confidence::Medium, whale())), Admission::Enqueued);
        assert_eq!(
            q.push(alert("a1", Confidence::Medium, whale())),
            Admission::Deduplicated
        );
        // different kind-set on the same market is not a duplicate
        assert_eq!(
            q.push(alert("a1", Confidence::Medium, Signal::OddsMove { delta: 0.1 })),
            Admission::Enqueued
        );
        // same kind-set on another market is not a duplicate
        assert_eq!(q.push(alert("a2", Confidence::Medium, whale())), Admission::Enqueued);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_dedup_window_expiry() {
        let mut q = AlertQueue::with_limits(QUEUE_DEPTH, Duration::ZERO);
        assert_eq!(q.push(alert("a1", Confidence::Medium, whale())), Admission::Enqueued);
        // zero window: the repeat is admitted again
        assert_eq!(q.push(alert("a1", Confidence::Medium, whale())), Admission::Enqueued);
    }

    #[test]
    fn test_overflow_evicts_oldest_medium_first() {
        let mut q = AlertQueue::with_limits(3, Duration::ZERO);
        q.push(alert("a1", Confidence::High, whale()));
        q.push(alert("a2", Confidence::Medium, whale()));
        q.push(alert("a3", Confidence::Medium, whale()));

        assert_eq!(
            q.push(alert("a4", Confidence::High, whale())),
            Admission::EvictedOldestMedium
        );
        assert_eq!(q.len(), 3);

        // a2 (the oldest MEDIUM) is gone; order is otherwise preserved
        let drained: Vec<String> = std::iter::from_fn(|| q.pop())
            .map(|a| a.trade.asset_id)
            .collect();
        assert_eq!(drained, vec!["a1", "a3", "a4"]);
    }

    #[test]
    fn test_overflow_drops_incoming_when_all_high() {
        let mut q = AlertQueue::with_limits(2, Duration::ZERO);
        q.push(alert("a1", Confidence::High, whale()));
        q.push(alert("a2", Confidence::High, whale()));

        assert_eq!(
            q.push(alert("a3", Confidence::Medium, whale())),
            Admission::DroppedIncoming
        );
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().trade.asset_id, "a1");
    }
}
