use crate::bus::types::Bus;
use crate::core::types::{Actor, Alert};
use crate::dispatch::queue::{Admission, AlertQueue};
use crate::dispatch::sink::{Sink, SinkError, RATE_LIMIT_FALLBACK, RETRY_DELAYS};
use crate::enrich::enricher::Enricher;
use anyhow::Result;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SINK_CHANNEL_DEPTH: usize = 64;
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Owns the outbound side: admission (bounded queue + dedup), leaky-bucket
/// pacing, enrichment, and fan-out to one delivery worker per sink. Ingestion
/// never blocks on network egress: alerts are handed off here and the
/// pipeline moves on.
pub struct DispatchActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    pub enricher: Enricher,
    pub sinks: Vec<Arc<dyn Sink>>,
    pub alerts_per_second: u32,
}

impl DispatchActor {
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        enricher: Enricher,
        sinks: Vec<Arc<dyn Sink>>,
        alerts_per_second: u32,
    ) -> DispatchActor {
        Self {
            bus,
            shutdown,
            enricher,
            sinks,
            alerts_per_second,
        }
    }
}

fn admit(queue: &mut AlertQueue, alert: Alert) {
    if alert.signals.is_empty() {
        // detection never publishes these; guard regardless
        warn!("Dropping alert with no signals for {}", alert.trade.asset_id);
        return;
    }
    let asset = alert.trade.asset_id.clone();
    match queue.push(alert) {
        Admission::Enqueued => {
            metrics::counter!("polywatch_alerts_queued_total").increment(1);
        }
        Admission::Deduplicated => {
            debug!("Suppressed duplicate alert for {asset}");
            metrics::counter!("polywatch_alerts_deduplicated_total").increment(1);
        }
        Admission::EvictedOldestMedium => {
            warn!("Alert queue full; evicted the oldest MEDIUM alert");
            metrics::counter!("polywatch_alerts_dropped_total", "reason" => "overflow_medium")
                .increment(1);
        }
        Admission::DroppedIncoming => {
            warn!("Alert queue full of HIGH alerts; dropped incoming alert for {asset}");
            metrics::counter!("polywatch_alerts_dropped_total", "reason" => "overflow_incoming")
                .increment(1);
        }
    }
}

async fn release(
    enricher: &Enricher,
    senders: &[(&'static str, mpsc::Sender<Alert>)],
    alert: Alert,
) {
    let alert = enricher.enrich(alert).await;
    for (name, tx) in senders {
        if tx.send(alert.clone()).await.is_err() {
            warn!("{name} worker channel closed");
        }
    }
}

async fn sink_worker(sink: Arc<dyn Sink>, mut rx: mpsc::Receiver<Alert>) {
    info!("{} sink worker started", sink.name());
    while let Some(alert) = rx.recv().await {
        deliver_with_retry(sink.as_ref(), &alert).await;
    }
    info!("{} sink worker stopped", sink.name());
}

async fn deliver_with_retry(sink: &dyn Sink, alert: &Alert) {
    let mut attempt = 0usize;
    loop {
        match sink.deliver(alert).await {
            Ok(()) => {
                metrics::counter!("polywatch_alerts_sent_total", "sink" => sink.name())
                    .increment(1);
                debug!("{} delivered alert for {}", sink.name(), alert.trade.asset_id);
                return;
            }
            Err(SinkError::Permanent(msg)) => {
                error!("{} rejected alert permanently: {msg}", sink.name());
                metrics::counter!(
                    "polywatch_alerts_failed_total",
                    "sink" => sink.name(), "reason" => "permanent"
                )
                .increment(1);
                return;
            }
            Err(e) => {
                if attempt >= RETRY_DELAYS.len() {
                    error!(
                        "{} delivery failed after {} retries: {e}",
                        sink.name(),
                        RETRY_DELAYS.len()
                    );
                    metrics::counter!(
                        "polywatch_alerts_failed_total",
                        "sink" => sink.name(), "reason" => "transient"
                    )
                    .increment(1);
                    return;
                }
                let delay = match &e {
                    SinkError::RateLimited(Some(d)) => *d,
                    SinkError::RateLimited(None) => RATE_LIMIT_FALLBACK,
                    _ => RETRY_DELAYS[attempt],
                };
                warn!(
                    "{} delivery attempt {} failed ({e}); retrying in {:?}",
                    sink.name(),
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for DispatchActor {
    async fn run(self) -> Result<()> {
        info!("DispatchActor started ({} sinks)", self.sinks.len());

        let rate = NonZeroU32::new(self.alerts_per_second)
            .unwrap_or_else(|| NonZeroU32::new(1).expect("nonzero"));
        let limiter = RateLimiter::direct(Quota::per_second(rate));
        let mut queue = AlertQueue::new();

        // one delivery worker per sink over a bounded channel; order within a
        // sink is the channel order, and channel closure is the stop signal
        let mut workers = tokio::task::JoinSet::new();
        let mut senders: Vec<(&'static str, mpsc::Sender<Alert>)> = Vec::new();
        for sink in &self.sinks {
            let (tx, rx) = mpsc::channel(SINK_CHANNEL_DEPTH);
            senders.push((sink.name(), tx));
            workers.spawn(sink_worker(sink.clone(), rx));
        }

        let mut rx = self.bus.alerts.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("DispatchActor: shutdown requested");
                    break;
                }

                res = rx.recv() => {
                    match res {
                        Ok(alert) => admit(&mut queue, (*alert).clone()),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "DispatchActor lagged on alerts");
                            metrics::counter!("polywatch_alerts_dropped_total", "reason" => "lag")
                                .increment(n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("alerts stream closed; exiting DispatchActor");
                            break;
                        }
                    }
                }

                // leaky bucket: one release per rate interval while backlog exists
                _ = limiter.until_ready(), if !queue.is_empty() => {
                    if let Some(alert) = queue.pop() {
                        release(&self.enricher, &senders, alert).await;
                    }
                }
            }
        }

        // drain what is queued, still paced, bounded by the deadline
        if !queue.is_empty() {
            info!(pending = queue.len(), "Draining alert queue");
            let deadline = tokio::time::Instant::now() + DRAIN_DEADLINE;
            while let Some(alert) = queue.pop() {
                let work = async {
                    limiter.until_ready().await;
                    release(&self.enricher, &senders, alert).await;
                };
                if tokio::time::timeout_at(deadline, work).await.is_err() {
                    let dropped = (queue.len() + 1) as u64;
                    warn!(dropped, "Drain deadline exceeded; dropping remaining alerts");
                    metrics::counter!("polywatch_alerts_dropped_total", "reason" => "drain_deadline")
                        .increment(dropped);
                    break;
                }
            }
        }

        drop(senders);
        let join_all = async {
            while workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_DEADLINE, join_all).await.is_err() {
            warn!("Sink workers exceeded the shutdown deadline; aborting in-flight deliveries");
            workers.shutdown().await;
        }

        info!("DispatchActor stopped cleanly");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Confidence, Outcome, Side, Signal, Trade};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        delivered: Mutex<Vec<Alert>>,
        fail_first: AtomicUsize,
    }

    impl RecordingSink {
        fn new(fail_first: usize) -> Arc<RecordingSink> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(fail_first),
            })
        }

        fn count(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Transient("boom".to_string()));
            }
            self.delivered.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn alert(asset: &str, signals: Vec<Signal>) -> Alert {
        Alert {
            trade: Trade {
                asset_id: asset.to_string(),
                side: Side::Buy,
                outcome: Outcome::Yes,
                price: 0.6,
                size: 20_000.0,
                wallet: "0xa".to_string(),
                timestamp_ms: 0,
                trade_id: "t".to_string(),
            },
            signals,
            confidence: Confidence::Medium,
            market_title: "m".to_string(),
            market_slug: None,
            end_time: None,
            wallet_tx_count: None,
            midpoint: Some(0.6), // pre-filled so enrichment skips the fetch
        }
    }

    fn whale() -> Signal {
        Signal::Whale { usd_value: 12_000.0, multiplier: None }
    }

    /// Enricher pointed at a closed port: fetches fail fast, alerts degrade.
    fn offline_enricher() -> Enricher {
        Enricher::new(reqwest::Client::new(), "http://127.0.0.1:9".to_string())
    }

    #[tokio::test]
    async fn test_fan_out_and_dedup() {
        let bus = Bus::new();
        let shutdown = CancellationToken::new();
        let sink_a = RecordingSink::new(0);
        let sink_b = RecordingSink::new(0);
        let actor = DispatchActor::new(
            bus.clone(),
            shutdown.clone(),
            offline_enricher(),
            vec![sink_a.clone(), sink_b.clone()],
            1,
        );
        let handle = tokio::spawn(actor.run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.alerts.publish(alert("a1", vec![whale()])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink_a.count(), 1);
        assert_eq!(sink_b.count(), 1);

        // the same (asset, kind-set) within 30s is suppressed at admission
        bus.alerts.publish(alert("a1", vec![whale()])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink_a.count(), 1);

        // an alert with no signals never reaches a sink
        bus.alerts.publish(alert("a2", vec![])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink_a.count(), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let sink = RecordingSink::new(1);
        let a = alert("a1", vec![whale()]);
        deliver_with_retry(sink.as_ref(), &a).await;
        assert_eq!(sink.count(), 1);
    }

    struct PermanentSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Sink for PermanentSink {
        fn name(&self) -> &'static str {
            "permanent"
        }

        async fn deliver(&self, _alert: &Alert) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Permanent("400 bad request".to_string()))
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let sink = PermanentSink {
            attempts: AtomicUsize::new(0),
        };
        let a = alert("a1", vec![whale()]);
        deliver_with_retry(&sink, &a).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }
}
