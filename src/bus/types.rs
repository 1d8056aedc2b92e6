use crate::core::types::{Alert, Trade, WalletRequest, WalletUpdate};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffer sizing per hop. The trade topic is the backpressure valve between
/// the socket reader and detection: when detection falls behind, the oldest
/// buffered trades are skipped (`RecvError::Lagged`) rather than blocking the
/// reader, and the consumer counts the loss.
const TRADES_CAP: usize = 1024;
const ALERTS_CAP: usize = 256;
const WALLET_CAP: usize = 256;

// ---------- Topic trait (broadcast semantics) ----------
#[async_trait::async_trait]
pub trait Topic<T>: Sync + Send + 'static {
    /// Publish a message to all subscribers.
    async fn publish(&self, msg: T) -> Result<()>;

    /// Subscribe to the stream (each subscriber has an independent cursor).
    fn subscribe(&self) -> broadcast::Receiver<Arc<T>>;
}

// ---------- Concrete broadcast topic ----------
// 1->N fanout, lossy under lag. Payloads are wrapped in Arc<T> so fanout
// never clones T. Each topic carries its name for throughput metrics.
pub struct BroadcastTopic<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Clone + Send + Sync + 'static> BroadcastTopic<T> {
    pub fn new(name: &'static str, cap: usize) -> Self {
        let (tx, _rx) = broadcast::channel(cap);
        Self { name, tx }
    }
}

#[async_trait]
impl<T: Debug + Clone + Send + Sync + 'static> Topic<T> for BroadcastTopic<T> {
    async fn publish(&self, msg: T) -> Result<()> {
        metrics::counter!("polywatch_bus_published_total", "topic" => self.name).increment(1);
        // send only errors when no receivers exist, which is not a fault
        let _ = self.tx.send(Arc::new(msg));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
pub struct Bus {
    /// Normalized trades, stream -> detect.
    pub trades: Arc<dyn Topic<Trade>>,
    /// Alert candidates, detect -> dispatch.
    pub alerts: Arc<dyn Topic<Alert>>,
    /// Wallet tx-count lookups, detect -> wallet actor.
    pub wallet_requests: Arc<dyn Topic<WalletRequest>>,
    /// Lookup results, wallet actor -> detect (the cache's single writer).
    pub wallet_updates: Arc<dyn Topic<WalletUpdate>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            trades: Arc::new(BroadcastTopic::<Trade>::new("trades", TRADES_CAP)),
            alerts: Arc::new(BroadcastTopic::<Alert>::new("alerts", ALERTS_CAP)),
            wallet_requests: Arc::new(BroadcastTopic::<WalletRequest>::new(
                "wallet_requests",
                WALLET_CAP,
            )),
            wallet_updates: Arc::new(BroadcastTopic::<WalletUpdate>::new(
                "wallet_updates",
                WALLET_CAP,
            )),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
