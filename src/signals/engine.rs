use crate::config::config::AppCfg;
use crate::core::types::{Confidence, Outcome, Side, Signal, Trade};
use crate::stats::store::MarketStats;
use chrono::{DateTime, Utc};

/// Minimum rolling-window population before the relative whale test applies;
/// prevents spurious firings on cold markets.
const WHALE_MIN_SAMPLES: usize = 20;

/// Trades at or above this notional are HIGH confidence regardless of how
/// many signals fired.
const HIGH_CONFIDENCE_USD: f64 = 25_000.0;

/// Evaluates the six insider-likeness predicates for one trade.
///
/// Every predicate is a pure function of the trade, the pre-update
/// `MarketStats` (except `recent_buyers`, which already includes the current
/// trade) and the cached wallet tx count. The caller owns the ordering:
/// record the buyer, evaluate, then apply the post-trade stats update.
pub struct SignalEngine {
    whale_threshold_usd: f64,
    whale_multiplier: f64,
    fresh_wallet_max_txs: u64,
    cluster_min_wallets: usize,
    timing_hours_threshold: f64,
    odds_movement_threshold: f64,
    contrarian_consensus_threshold: f64,
    contrarian_min_size_usd: f64,
}

impl SignalEngine {
    pub fn new(cfg: &AppCfg) -> SignalEngine {
        Self {
            whale_threshold_usd: cfg.whale_threshold_usd,
            whale_multiplier: cfg.whale_multiplier,
            fresh_wallet_max_txs: cfg.fresh_wallet_max_txs,
            cluster_min_wallets: cfg.cluster_min_wallets,
            timing_hours_threshold: cfg.timing_hours_threshold,
            odds_movement_threshold: cfg.odds_movement_threshold,
            contrarian_consensus_threshold: cfg.contrarian_consensus_threshold,
            contrarian_min_size_usd: cfg.contrarian_min_size_usd,
        }
    }

    pub fn evaluate(
        &self,
        trade: &Trade,
        stats: &MarketStats,
        end_time: Option<DateTime<Utc>>,
        wallet_tx_count: Option<u64>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();

        if let Some(signal) = self.whale(trade, stats) {
            signals.push(signal);
        }
        if let Some(signal) = self.fresh_wallet(wallet_tx_count) {
            signals.push(signal);
        }
        if let Some(signal) = self.cluster(trade, stats) {
            signals.push(signal);
        }
        if let Some(signal) = self.timing(trade, end_time) {
            signals.push(signal);
        }
        if let Some(signal) = self.odds_move(trade, stats) {
            signals.push(signal);
        }
        if let Some(signal) = self.contrarian(trade, stats) {
            signals.push(signal);
        }

        for s in &signals {
            metrics::counter!("polywatch_signals_total", "kind" => s.kind().as_str())
                .increment(1);
        }
        signals
    }

    pub fn confidence(&self, trade: &Trade, signals: &[Signal]) -> Confidence {
        if signals.len() >= 2 || trade.usd_value() >= HIGH_CONFIDENCE_USD {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    /// Absolute notional, or relative to the market's recent mean once the
    /// window has enough samples. `recent_trades` is the pre-update window, so
    /// a trade never fires against its own contribution to the average.
    fn whale(&self, trade: &Trade, stats: &MarketStats) -> Option<Signal> {
        let usd_value = trade.usd_value();
        if usd_value >= self.whale_threshold_usd {
            return Some(Signal::Whale {
                usd_value,
                multiplier: None,
            });
        }
        if stats.sample_count() >= WHALE_MIN_SAMPLES {
            if let Some(mean) = stats.mean_trade_value() {
                if mean > 0.0 && usd_value >= mean * self.whale_multiplier {
                    return Some(Signal::Whale {
                        usd_value,
                        multiplier: Some(usd_value / mean),
                    });
                }
            }
        }
        None
    }

    /// A missing or failed lookup (`None` / `u64::MAX`) never fires.
    fn fresh_wallet(&self, wallet_tx_count: Option<u64>) -> Option<Signal> {
        let tx_count = wallet_tx_count?;
        if tx_count < self.fresh_wallet_max_txs {
            Some(Signal::FreshWallet { tx_count })
        } else {
            None
        }
    }

    /// Distinct wallets buying the same outcome inside the cluster window,
    /// current trade included (the caller appended it before evaluation).
    /// Only BUYs count.
    fn cluster(&self, trade: &Trade, stats: &MarketStats) -> Option<Signal> {
        if trade.side != Side::Buy {
            return None;
        }
        let distinct_buyers = stats.distinct_buyers(trade.outcome);
        if distinct_buyers >= self.cluster_min_wallets {
            Some(Signal::Cluster { distinct_buyers })
        } else {
            None
        }
    }

    fn timing(&self, trade: &Trade, end_time: Option<DateTime<Utc>>) -> Option<Signal> {
        let end_ms = end_time?.timestamp_millis();
        let remaining_ms = end_ms - trade.timestamp_ms;
        if remaining_ms <= 0 {
            return None;
        }
        let hours_to_close = remaining_ms as f64 / 3_600_000.0;
        if hours_to_close <= self.timing_hours_threshold {
            Some(Signal::Timing { hours_to_close })
        } else {
            None
        }
    }

    /// No prior price means no movement to measure; the first trade in a
    /// market never fires this.
    fn odds_move(&self, trade: &Trade, stats: &MarketStats) -> Option<Signal> {
        let last_price = stats.last_price?;
        let delta = trade.price - last_price;
        if delta.abs() >= self.odds_movement_threshold {
            Some(Signal::OddsMove { delta })
        } else {
            None
        }
    }

    /// A sufficiently large trade increasing exposure to the minority side of
    /// a settled consensus.
    fn contrarian(&self, trade: &Trade, stats: &MarketStats) -> Option<Signal> {
        if trade.usd_value() < self.contrarian_min_size_usd {
            return None;
        }
        let consensus_yes = stats.consensus_yes?;

        let against_consensus = if consensus_yes >= self.contrarian_consensus_threshold {
            // consensus YES: betting on NO is contrarian
            matches!(
                (trade.side, trade.outcome),
                (Side::Buy, Outcome::No) | (Side::Sell, Outcome::Yes)
            )
        } else if consensus_yes <= 1.0 - self.contrarian_consensus_threshold {
            // consensus NO: betting on YES is contrarian
            matches!(
                (trade.side, trade.outcome),
                (Side::Buy, Outcome::Yes) | (Side::Sell, Outcome::No)
            )
        } else {
            false
        };

        if against_consensus {
            Some(Signal::Contrarian { consensus_yes })
        } else {
            None
        }
    }
}
