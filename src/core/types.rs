use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[async_trait::async_trait]
pub trait Actor: Send + Sync + 'static {
    async fn run(self) -> Result<()>;
}

// ----------- Domain messages -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Side> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Outcome> {
        if s.eq_ignore_ascii_case("yes") {
            Some(Outcome::Yes)
        } else if s.eq_ignore_ascii_case("no") {
            Some(Outcome::No)
        } else {
            None
        }
    }

    pub fn opposite(&self) -> Outcome {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

/// A single fill received from the CLOB market channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trade {
    pub asset_id: String,
    pub side: Side,
    pub outcome: Outcome,
    /// Implied probability in [0, 1].
    pub price: f64,
    /// Number of shares.
    pub size: f64,
    /// Taker address, lowercase hex.
    pub wallet: String,
    /// Millisecond epoch.
    pub timestamp_ms: i64,
    pub trade_id: String,
}

impl Trade {
    pub fn usd_value(&self) -> f64 {
        self.price * self.size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Whale,
    FreshWallet,
    Cluster,
    Timing,
    OddsMove,
    Contrarian,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Whale => "whale",
            SignalKind::FreshWallet => "fresh_wallet",
            SignalKind::Cluster => "cluster",
            SignalKind::Timing => "timing",
            SignalKind::OddsMove => "odds_move",
            SignalKind::Contrarian => "contrarian",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            SignalKind::Whale => 1 << 0,
            SignalKind::FreshWallet => 1 << 1,
            SignalKind::Cluster => 1 << 2,
            SignalKind::Timing => 1 << 3,
            SignalKind::OddsMove => 1 << 4,
            SignalKind::Contrarian => 1 << 5,
        }
    }
}

/// A detected signal together with its kind-specific evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    /// Absolutely large, or large relative to the market's recent mean
    /// (`multiplier` is `usd_value / mean`, absent for absolute firings).
    Whale { usd_value: f64, multiplier: Option<f64> },
    FreshWallet { tx_count: u64 },
    Cluster { distinct_buyers: usize },
    Timing { hours_to_close: f64 },
    OddsMove { delta: f64 },
    Contrarian { consensus_yes: f64 },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Whale { .. } => SignalKind::Whale,
            Signal::FreshWallet { .. } => SignalKind::FreshWallet,
            Signal::Cluster { .. } => SignalKind::Cluster,
            Signal::Timing { .. } => SignalKind::Timing,
            Signal::OddsMove { .. } => SignalKind::OddsMove,
            Signal::Contrarian { .. } => SignalKind::Contrarian,
        }
    }

    /// One-line rendering with the evidence, shared by the sink formatters.
    pub fn describe(&self) -> String {
        match self {
            Signal::Whale { usd_value, multiplier: Some(m) } => {
                format!("Whale trade (${usd_value:.0}, {m:.1}x market average)")
            }
            Signal::Whale { usd_value, multiplier: None } => {
                format!("Whale trade (${usd_value:.0})")
            }
            Signal::FreshWallet { tx_count } => format!("Fresh wallet ({tx_count} txs)"),
            Signal::Cluster { distinct_buyers } => {
                format!("Cluster ({distinct_buyers} distinct buyers)")
            }
            Signal::Timing { hours_to_close } => format!("Closes in {hours_to_close:.1}h"),
            Signal::OddsMove { delta } => format!("Odds moved {delta:+.2}"),
            Signal::Contrarian { consensus_yes } => {
                format!("Against {:.0}% YES consensus", consensus_yes * 100.0)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
}

/// A trade that survived filtering and fired at least one signal, bundled
/// with the context the dispatcher needs. Catalog and wallet fields are
/// attached at detection time so downstream stages never touch the caches.
#[derive(Clone, Debug)]
pub struct Alert {
    pub trade: Trade,
    pub signals: Vec<Signal>,
    pub confidence: Confidence,
    pub market_title: String,
    pub market_slug: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub wallet_tx_count: Option<u64>,
    /// Order-book midpoint, filled in by best-effort enrichment.
    pub midpoint: Option<f64>,
}

impl Alert {
    /// Bitmask over the firing signal kinds; the dispatcher dedup key is
    /// `(asset_id, kind_mask)`.
    pub fn kind_mask(&self) -> u8 {
        self.signals.iter().fold(0u8, |m, s| m | s.kind().bit())
    }
}

#[derive(Clone, Debug)]
pub struct WalletRequest {
    pub wallet: String,
}

#[derive(Clone, Debug)]
pub struct WalletUpdate {
    pub wallet: String,
    /// `u64::MAX` marks a failed lookup, which can never read as fresh.
    pub tx_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade() -> Trade {
        Trade {
            asset_id: "a1".to_string(),
            side: Side::Buy,
            outcome: Outcome::Yes,
            price: 0.6,
            size: 20_000.0,
            wallet: "0xa".to_string(),
            timestamp_ms: 1_700_000_000_000,
            trade_id: "t1".to_string(),
        }
    }

    #[test]
    fn test_usd_value() {
        assert!((trade().usd_value() - 12_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_side_outcome_parsing() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("mint"), None);
        assert_eq!(Outcome::parse("Yes"), Some(Outcome::Yes));
        assert_eq!(Outcome::parse("NO"), Some(Outcome::No));
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
    }

    #[test]
    fn test_kind_mask_is_order_independent() {
        let a = Alert {
            trade: trade(),
            signals: vec![
                Signal::Whale { usd_value: 12_000.0, multiplier: None },
                Signal::OddsMove { delta: 0.1 },
            ],
            confidence: Confidence::High,
            market_title: "m".to_string(),
            market_slug: None,
            end_time: None,
            wallet_tx_count: None,
            midpoint: None,
        };
        let mut b = a.clone();
        b.signals.reverse();
        assert_eq!(a.kind_mask(), b.kind_mask());
        assert_ne!(a.kind_mask(), 0);
    }
}
