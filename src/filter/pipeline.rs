use crate::catalog::loader::MarketEntry;
use crate::config::config::AppCfg;
use crate::core::types::Trade;
use crate::stats::store::MarketStats;

/// Why the gatekeeper dropped a trade. Stage order is fixed: the first
/// rejection stops the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    UnknownMarket,
    ExcludedMarket,
    BelowMinSize,
    LpPairing,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::UnknownMarket => "unknown_market",
            Rejection::ExcludedMarket => "excluded_market",
            Rejection::BelowMinSize => "below_min_size",
            Rejection::LpPairing => "lp_pairing",
        }
    }
}

pub struct FilterPipeline {
    min_usd_size: f64,
    lp_window_ms: i64,
}

impl FilterPipeline {
    pub fn new(cfg: &AppCfg) -> FilterPipeline {
        Self {
            min_usd_size: cfg.min_usd_size,
            lp_window_ms: cfg.lp_detection_window_ms,
        }
    }

    /// Run the reject chain for one trade. A trade that reaches the LP stage
    /// is recorded in `pending_opposite` even when it ultimately survives;
    /// a pairing hit erases the earlier leg and discards this one.
    pub fn evaluate(
        &self,
        trade: &Trade,
        entry: Option<&MarketEntry>,
        stats: &mut MarketStats,
    ) -> Result<(), Rejection> {
        let entry = entry.ok_or(Rejection::UnknownMarket)?;
        if entry.excluded {
            return Err(Rejection::ExcludedMarket);
        }

        if trade.usd_value() < self.min_usd_size {
            return Err(Rejection::BelowMinSize);
        }

        if stats.check_lp_pair(
            &trade.wallet,
            trade.outcome,
            trade.timestamp_ms,
            self.lp_window_ms,
        ) {
            return Err(Rejection::LpPairing);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outcome, Side};
    use config::Config;

    fn pipeline() -> FilterPipeline {
        let cfg: AppCfg = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        FilterPipeline::new(&cfg)
    }

    fn entry(excluded: bool) -> MarketEntry {
        MarketEntry {
            asset_id: "a1".to_string(),
            question: "Will it happen?".to_string(),
            slug: None,
            end_time: None,
            outcome: Outcome::Yes,
            excluded,
        }
    }

    fn trade(wallet: &str, outcome: Outcome, usd: f64, ts: i64) -> Trade {
        Trade {
            asset_id: "a1".to_string(),
            side: Side::Buy,
            outcome,
            price: 0.5,
            size: usd / 0.5,
            wallet: wallet.to_string(),
            timestamp_ms: ts,
            trade_id: format!("t{ts}"),
        }
    }

    #[test]
    fn test_unknown_market_rejected() {
        let p = pipeline();
        let mut stats = MarketStats::default();
        let t = trade("0xa", Outcome::Yes, 5000.0, 1000);
        assert_eq!(p.evaluate(&t, None, &mut stats), Err(Rejection::UnknownMarket));
    }

    #[test]
    fn test_excluded_market_rejected() {
        let p = pipeline();
        let mut stats = MarketStats::default();
        let t = trade("0xa", Outcome::Yes, 5000.0, 1000);
        assert_eq!(
            p.evaluate(&t, Some(&entry(true)), &mut stats),
            Err(Rejection::ExcludedMarket)
        );
    }

    #[test]
    fn test_below_min_size_rejected() {
        let p = pipeline();
        let mut stats = MarketStats::default();
        let t = trade("0xa", Outcome::Yes, 1999.0, 1000);
        assert_eq!(
            p.evaluate(&t, Some(&entry(false)), &mut stats),
            Err(Rejection::BelowMinSize)
        );
        // small trades never reach the LP stage, so nothing was recorded
        assert!(!stats.check_lp_pair("0xa", Outcome::No, 1050, 200));
    }

    #[test]
    fn test_lp_pair_rejects_both_legs() {
        let p = pipeline();
        let mut stats = MarketStats::default();
        let e = entry(false);

        let first = trade("0xd", Outcome::Yes, 5000.0, 1000);
        assert!(p.evaluate(&first, Some(&e), &mut stats).is_ok());

        let second = trade("0xd", Outcome::No, 5000.0, 1150);
        assert_eq!(
            p.evaluate(&second, Some(&e), &mut stats),
            Err(Rejection::LpPairing)
        );
    }

    #[test]
    fn test_lp_pair_outside_window_passes() {
        let p = pipeline();
        let mut stats = MarketStats::default();
        let e = entry(false);

        let first = trade("0xd", Outcome::Yes, 5000.0, 1000);
        let second = trade("0xd", Outcome::No, 5000.0, 1500);
        assert!(p.evaluate(&first, Some(&e), &mut stats).is_ok());
        assert!(p.evaluate(&second, Some(&e), &mut stats).is_ok());
    }
}
