use crate::core::types::Outcome;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Rolling-window length for per-market trade values.
pub const RECENT_TRADES_CAP: usize = 100;

/// Soft cap on cached wallets; expired and oldest entries are evicted when hit.
const WALLET_CACHE_CAP: usize = 10_000;

#[derive(Clone, Debug)]
pub struct BuyerRecord {
    pub wallet: String,
    pub outcome: Outcome,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug)]
struct PendingTrade {
    outcome: Outcome,
    timestamp_ms: i64,
}

/// Per-asset mutable aggregate. All windows are keyed on trade timestamps and
/// pruned lazily on access: no timers, no background sweeps, which keeps the
/// single-writer discipline trivial.
#[derive(Debug, Default)]
pub struct MarketStats {
    recent_trades: VecDeque<f64>,
    pub last_price: Option<f64>,
    /// Most recently observed YES-outcome price.
    pub consensus_yes: Option<f64>,
    recent_buyers: VecDeque<BuyerRecord>,
    pending_opposite: HashMap<String, PendingTrade>,
}

impl MarketStats {
    pub fn sample_count(&self) -> usize {
        self.recent_trades.len()
    }

    pub fn mean_trade_value(&self) -> Option<f64> {
        if self.recent_trades.is_empty() {
            return None;
        }
        Some(self.recent_trades.iter().sum::<f64>() / self.recent_trades.len() as f64)
    }

    /// Record a surviving trade's usd value, evicting the oldest beyond the cap.
    pub fn push_trade_value(&mut self, usd_value: f64) {
        if self.recent_trades.len() >= RECENT_TRADES_CAP {
            self.recent_trades.pop_front();
        }
        self.recent_trades.push_back(usd_value);
    }

    /// Post-evaluation price bookkeeping: `last_price` and the YES-implied
    /// consensus price.
    pub fn observe_price(&mut self, price: f64, outcome: Outcome) {
        self.last_price = Some(price);
        self.consensus_yes = Some(match outcome {
            Outcome::Yes => price,
            Outcome::No => 1.0 - price,
        });
    }

    pub fn prune_buyers(&mut self, now_ms: i64, window: Duration) {
        let window_ms = window.as_millis() as i64;
        while self
            .recent_buyers
            .front()
            .is_some_and(|r| now_ms - r.timestamp_ms > window_ms)
        {
            self.recent_buyers.pop_front();
        }
    }

    /// Append a buyer, pruning the window first. Only BUYs enter this window.
    pub fn record_buyer(&mut self, wallet: &str, outcome: Outcome, now_ms: i64, window: Duration) {
        self.prune_buyers(now_ms, window);
        self.recent_buyers.push_back(BuyerRecord {
            wallet: wallet.to_string(),
            outcome,
            timestamp_ms: now_ms,
        });
    }

    /// Distinct wallets that bought `outcome` inside the current window.
    pub fn distinct_buyers(&self, outcome: Outcome) -> usize {
        let mut wallets: Vec<&str> = self
            .recent_buyers
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.wallet.as_str())
            .collect();
        wallets.sort_unstable();
        wallets.dedup();
        wallets.len()
    }

    #[cfg(test)]
    pub fn buyers_len(&self) -> usize {
        self.recent_buyers.len()
    }

    #[cfg(test)]
    pub fn buyers(&self) -> impl Iterator<Item = &BuyerRecord> {
        self.recent_buyers.iter()
    }

    /// LP/arbitrage pairing check. Returns true when the current trade pairs
    /// with an earlier opposite-outcome trade from the same wallet inside the
    /// window; the paired entry is erased and the caller discards the current
    /// trade too. Otherwise the current trade is recorded, overwriting any
    /// previous entry for the wallet.
    pub fn check_lp_pair(
        &mut self,
        wallet: &str,
        outcome: Outcome,
        now_ms: i64,
        window_ms: i64,
    ) -> bool {
        self.pending_opposite
            .retain(|_, p| (now_ms - p.timestamp_ms).abs() <= window_ms);

        if let Some(pending) = self.pending_opposite.get(wallet) {
            if pending.outcome == outcome.opposite()
                && (now_ms - pending.timestamp_ms).abs() <= window_ms
            {
                self.pending_opposite.remove(wallet);
                return true;
            }
        }

        self.pending_opposite.insert(
            wallet.to_string(),
            PendingTrade {
                outcome,
                timestamp_ms: now_ms,
            },
        );
        false
    }
}

/// All per-market aggregates, owned exclusively by the detection stage.
#[derive(Debug, Default)]
pub struct StatsStore {
    markets: HashMap<String, MarketStats>,
}

impl StatsStore {
    pub fn new() -> StatsStore {
        Self::default()
    }

    pub fn market_mut(&mut self, asset_id: &str) -> &mut MarketStats {
        self.markets.entry(asset_id.to_string()).or_default()
    }

    pub fn market(&self, asset_id: &str) -> Option<&MarketStats> {
        self.markets.get(asset_id)
    }
}

#[derive(Clone, Debug)]
struct WalletEntry {
    tx_count: u64,
    fetched_at: Instant,
}

/// TTL'd wallet -> chain tx-count cache. Single writer (the detection stage);
/// a failed lookup is stored as `u64::MAX` so freshness checks fail closed.
#[derive(Debug)]
pub struct WalletCache {
    entries: HashMap<String, WalletEntry>,
    ttl: Duration,
}

impl WalletCache {
    pub fn new(ttl: Duration) -> WalletCache {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Cached tx count, expiring on read.
    pub fn get(&mut self, wallet: &str) -> Option<u64> {
        match self.entries.get(wallet) {
            Some(e) if e.fetched_at.elapsed() <= self.ttl => Some(e.tx_count),
            Some(_) => {
                self.entries.remove(wallet);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, wallet: &str, tx_count: u64) {
        if self.entries.len() >= WALLET_CACHE_CAP && !self.entries.contains_key(wallet) {
            self.evict();
        }
        self.entries.insert(
            wallet.to_string(),
            WalletEntry {
                tx_count,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.fetched_at.elapsed() <= ttl);
        if self.entries.len() >= WALLET_CACHE_CAP {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_trades_bounded_at_cap() {
        let mut stats = MarketStats::default();
        for i in 0..250 {
            stats.push_trade_value(i as f64);
            assert!(stats.sample_count() <= RECENT_TRADES_CAP);
        }
        assert_eq!(stats.sample_count(), RECENT_TRADES_CAP);
        // oldest evicted first: window now holds 150..=249
        let mean = stats.mean_trade_value().unwrap();
        assert!((mean - 199.5).abs() < 1e-9);
    }

    #[test]
    fn test_buyer_window_pruned_on_access() {
        let window = Duration::from_secs(60);
        let mut stats = MarketStats::default();
        stats.record_buyer("0xa", Outcome::Yes, 1_000, window);
        stats.record_buyer("0xb", Outcome::Yes, 30_000, window);
        // 70s later the first entry is out of window
        stats.record_buyer("0xc", Outcome::Yes, 71_000, window);

        assert_eq!(stats.buyers_len(), 2);
        let now = 71_000;
        assert!(stats
            .buyers()
            .all(|r| now - r.timestamp_ms <= window.as_millis() as i64));
        assert_eq!(stats.distinct_buyers(Outcome::Yes), 2);
    }

    #[test]
    fn test_distinct_buyers_dedups_wallets_and_splits_outcomes() {
        let window = Duration::from_secs(60);
        let mut stats = MarketStats::default();
        stats.record_buyer("0xa", Outcome::Yes, 1_000, window);
        stats.record_buyer("0xa", Outcome::Yes, 2_000, window);
        stats.record_buyer("0xb", Outcome::No, 3_000, window);
        assert_eq!(stats.distinct_buyers(Outcome::Yes), 1);
        assert_eq!(stats.distinct_buyers(Outcome::No), 1);
    }

    #[test]
    fn test_lp_pair_within_window_rejects_both() {
        let mut stats = MarketStats::default();
        assert!(!stats.check_lp_pair("0xd", Outcome::Yes, 1_000, 200));
        // opposite outcome 150ms later pairs and erases the pending entry
        assert!(stats.check_lp_pair("0xd", Outcome::No, 1_150, 200));
        // a third trade finds nothing pending
        assert!(!stats.check_lp_pair("0xd", Outcome::Yes, 1_200, 200));
    }

    #[test]
    fn test_lp_pair_outside_window_survives() {
        let mut stats = MarketStats::default();
        assert!(!stats.check_lp_pair("0xd", Outcome::Yes, 1_000, 200));
        assert!(!stats.check_lp_pair("0xd", Outcome::No, 1_500, 200));
    }

    #[test]
    fn test_lp_same_outcome_overwrites_entry() {
        let mut stats = MarketStats::default();
        assert!(!stats.check_lp_pair("0xd", Outcome::Yes, 1_000, 200));
        assert!(!stats.check_lp_pair("0xd", Outcome::Yes, 1_100, 200));
        // the overwrite refreshed the timestamp, so an opposite trade at
        // 1_250 still pairs against the 1_100 entry
        assert!(stats.check_lp_pair("0xd", Outcome::No, 1_250, 200));
    }

    #[test]
    fn test_observe_price_tracks_consensus() {
        let mut stats = MarketStats::default();
        stats.observe_price(0.82, Outcome::Yes);
        assert_eq!(stats.consensus_yes, Some(0.82));
        stats.observe_price(0.30, Outcome::No);
        assert!((stats.consensus_yes.unwrap() - 0.70).abs() < 1e-9);
        assert_eq!(stats.last_price, Some(0.30));
    }

    #[test]
    fn test_wallet_cache_ttl_expiry() {
        let mut cache = WalletCache::new(Duration::ZERO);
        cache.insert("0xa", 5);
        // zero TTL: expired on the next read
        assert_eq!(cache.get("0xa"), None);
        assert!(cache.is_empty());

        let mut cache = WalletCache::new(Duration::from_secs(3600));
        cache.insert("0xa", 5);
        cache.insert("0xb", u64::MAX);
        assert_eq!(cache.get("0xa"), Some(5));
        assert_eq!(cache.get("0xb"), Some(u64::MAX));
        assert_eq!(cache.len(), 2);
    }
}
