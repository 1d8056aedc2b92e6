use crate::bus::types::Bus;
use crate::catalog::loader::MarketCatalog;
use crate::config::config::AppCfg;
use crate::core::types::{Actor, Alert, Side, Trade, WalletRequest, WalletUpdate};
use crate::filter::pipeline::FilterPipeline;
use crate::signals::engine::SignalEngine;
use crate::stats::store::{StatsStore, WalletCache};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WALLET_CACHE_TTL: Duration = Duration::from_secs(3600);

/// The filter/detect stage: sole owner and sole writer of `StatsStore` and
/// `WalletCache`. Performs no I/O: wallet lookups go out as bus requests and
/// come back as updates through the same select loop, so every cache write is
/// serialized here. If this stage lags the trade topic, the oldest pending
/// trades are skipped and counted; the socket reader is never blocked.
pub struct DetectActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    catalog: Arc<MarketCatalog>,
    filter: FilterPipeline,
    engine: SignalEngine,
    stats: StatsStore,
    wallets: WalletCache,
    inflight_lookups: HashSet<String>,
    cluster_window: Duration,
}

impl DetectActor {
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        catalog: Arc<MarketCatalog>,
        cfg: &AppCfg,
    ) -> DetectActor {
        Self {
            bus,
            shutdown,
            catalog,
            filter: FilterPipeline::new(cfg),
            engine: SignalEngine::new(cfg),
            stats: StatsStore::new(),
            wallets: WalletCache::new(WALLET_CACHE_TTL),
            inflight_lookups: HashSet::new(),
            cluster_window: Duration::from_secs(cfg.cluster_window_seconds),
        }
    }

    async fn handle_trade(&mut self, trade: &Trade) {
        let entry = self.catalog.get(&trade.asset_id);
        let stats = self.stats.market_mut(&trade.asset_id);

        if let Err(rejection) = self.filter.evaluate(trade, entry, stats) {
            metrics::counter!("polywatch_trades_rejected_total", "stage" => rejection.as_str())
                .increment(1);
            if trade.usd_value() >= 500.0 {
                debug!(
                    "Trade filtered (${:.0}): {}",
                    trade.usd_value(),
                    rejection.as_str()
                );
            }
            return;
        }
        let Some(entry) = entry else {
            return; // unreachable: the filter rejects unknown markets
        };

        let wallet_tx_count = self.wallets.get(&trade.wallet);

        // cluster window is pre-updated with the current trade; everything
        // else the engine reads is the pre-trade state
        if trade.side == Side::Buy {
            stats.record_buyer(
                &trade.wallet,
                trade.outcome,
                trade.timestamp_ms,
                self.cluster_window,
            );
        } else {
            stats.prune_buyers(trade.timestamp_ms, self.cluster_window);
        }

        let signals = self
            .engine
            .evaluate(trade, stats, entry.end_time, wallet_tx_count);

        stats.push_trade_value(trade.usd_value());
        stats.observe_price(trade.price, trade.outcome);

        // cache miss: refresh asynchronously, deduplicated while in flight;
        // this trade is evaluated without the wallet dimension
        if wallet_tx_count.is_none() && self.inflight_lookups.insert(trade.wallet.clone()) {
            let request = WalletRequest {
                wallet: trade.wallet.clone(),
            };
            if let Err(e) = self.bus.wallet_requests.publish(request).await {
                error!("Failed to publish wallet request: {e}");
            }
        }

        if signals.is_empty() {
            return;
        }

        let confidence = self.engine.confidence(trade, &signals);
        let kinds: Vec<&str> = signals.iter().map(|s| s.kind().as_str()).collect();
        info!(
            "Signal: {} {} ${:.0} @ {:.2} [{}] {:?}",
            trade.side.as_str(),
            trade.outcome.as_str(),
            trade.usd_value(),
            trade.price,
            kinds.join(", "),
            confidence,
        );

        let alert = Alert {
            trade: trade.clone(),
            signals,
            confidence,
            market_title: entry.question.clone(),
            market_slug: entry.slug.clone(),
            end_time: entry.end_time,
            wallet_tx_count: wallet_tx_count.filter(|&n| n != u64::MAX),
            midpoint: None,
        };
        if let Err(e) = self.bus.alerts.publish(alert).await {
            error!("Failed to publish alert: {e}");
        }
    }

    fn apply_wallet_update(&mut self, update: &WalletUpdate) {
        self.inflight_lookups.remove(&update.wallet);
        self.wallets.insert(&update.wallet, update.tx_count);
    }
}

#[async_trait::async_trait]
impl Actor for DetectActor {
    async fn run(mut self) -> Result<()> {
        info!("DetectActor started ({} catalog assets)", self.catalog.len());

        let mut trades_rx = self.bus.trades.subscribe();
        let mut wallet_rx = self.bus.wallet_updates.subscribe();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("DetectActor: shutdown requested");
                    break;
                }

                res = trades_rx.recv() => {
                    match res {
                        Ok(trade) => self.handle_trade(&trade).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // detection fell behind; the oldest pending trades
                            // were skipped in favor of the live stream
                            warn!(lagged = n, "DetectActor lagged on trades");
                            metrics::counter!("polywatch_trades_dropped_total").increment(n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("trades stream closed; exiting DetectActor");
                            break;
                        }
                    }
                }

                res = wallet_rx.recv() => {
                    match res {
                        Ok(update) => self.apply_wallet_update(&update),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "DetectActor lagged on wallet updates");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("wallet updates stream closed");
                        }
                    }
                }
            }
        }

        info!("DetectActor stopped cleanly");
        Ok(())
    }
}
