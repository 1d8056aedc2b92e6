use crate::config::config::AppCfg;
use crate::core::types::Outcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// One catalog entry per CLOB token (asset). A binary market contributes two
/// entries, one per outcome.
#[derive(Clone, Debug)]
pub struct MarketEntry {
    pub asset_id: String,
    pub question: String,
    pub slug: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    /// Question matched a configured exclusion keyword; precomputed here so
    /// the filter stage is a plain lookup.
    pub excluded: bool,
}

/// Immutable snapshot of the subscription universe, built once at startup.
#[derive(Debug, Default)]
pub struct MarketCatalog {
    by_asset: HashMap<String, MarketEntry>,
    asset_ids: Vec<String>,
}

impl MarketCatalog {
    pub fn from_entries(entries: Vec<MarketEntry>) -> MarketCatalog {
        let mut catalog = MarketCatalog::default();
        for entry in entries {
            catalog.asset_ids.push(entry.asset_id.clone());
            catalog.by_asset.insert(entry.asset_id.clone(), entry);
        }
        catalog
    }

    pub fn get(&self, asset_id: &str) -> Option<&MarketEntry> {
        self.by_asset.get(asset_id)
    }

    /// Asset ids in volume-ranked market order; this is the subscription set.
    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    pub fn is_empty(&self) -> bool {
        self.asset_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.asset_ids.len()
    }
}

/// Gamma's numeric fields arrive as numbers or stringified numbers depending
/// on the endpoint revision.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

impl NumOrStr {
    fn as_f64(&self) -> f64 {
        match self {
            NumOrStr::Num(n) => *n,
            NumOrStr::Str(s) => s.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    id: String,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, rename = "endDate")]
    end_date: Option<String>,
    #[serde(default, rename = "volume24hr")]
    volume_24hr: Option<NumOrStr>,
    #[serde(default, rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
    #[serde(default)]
    outcomes: Option<String>,
}

impl GammaMarket {
    /// Gamma serializes `clobTokenIds` and `outcomes` as stringified JSON
    /// arrays; pair them up positionally.
    fn tokens(&self) -> Vec<(String, Outcome)> {
        let (Some(ids_str), Some(outcomes_str)) = (&self.clob_token_ids, &self.outcomes) else {
            return Vec::new();
        };

        let ids: Vec<String> = match serde_json::from_str(ids_str) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse clobTokenIds: '{}' - Error: {}", ids_str, e);
                return Vec::new();
            }
        };
        let outcomes: Vec<String> = match serde_json::from_str(outcomes_str) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse outcomes: '{}' - Error: {}", outcomes_str, e);
                return Vec::new();
            }
        };

        ids.into_iter()
            .zip(outcomes)
            .filter_map(|(id, name)| Outcome::parse(&name).map(|o| (id, o)))
            .collect()
    }

    fn volume(&self) -> f64 {
        self.volume_24hr.as_ref().map(NumOrStr::as_f64).unwrap_or(0.0)
    }
}

pub struct CatalogLoader {
    client: Client,
    cfg: AppCfg,
}

impl CatalogLoader {
    pub fn new(client: Client, cfg: AppCfg) -> CatalogLoader {
        Self { client, cfg }
    }

    /// Fetch the top active markets by 24h volume. Bounded retry; an empty or
    /// unreachable catalog is a fatal startup error; the pipeline does not
    /// run blind.
    pub async fn load(&self) -> Result<MarketCatalog> {
        const ATTEMPTS: u32 = 3;

        let mut last_err = None;
        for attempt in 1..=ATTEMPTS {
            match self.fetch_markets().await {
                Ok(markets) => {
                    let catalog = self.build(markets);
                    anyhow::ensure!(!catalog.is_empty(), "catalog returned no usable markets");
                    info!(
                        assets = catalog.len(),
                        "Market catalog loaded ({} markets requested)",
                        self.cfg.market_limit
                    );
                    return Ok(catalog);
                }
                Err(e) => {
                    error!(
                        "Catalog fetch attempt {}/{} failed: {:#}",
                        attempt, ATTEMPTS, e
                    );
                    last_err = Some(e);
                    if attempt < ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("catalog fetch failed")))
    }

    async fn fetch_markets(&self) -> Result<Vec<GammaMarket>> {
        let res = self
            .client
            .get(&self.cfg.gamma_markets_url)
            .query(&[
                ("closed", "false"),
                ("order", "volume24hr"),
                ("ascending", "false"),
                ("limit", &self.cfg.market_limit.to_string()),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("requesting market catalog")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error: status={}, body={}", status, body);
        }

        res.json::<Vec<GammaMarket>>()
            .await
            .context("parsing market catalog response")
    }

    /// Rank and truncate client-side (the server ordering is advisory), then
    /// expand each market into its per-token entries.
    fn build(&self, mut markets: Vec<GammaMarket>) -> MarketCatalog {
        markets.sort_by(|a, b| {
            b.volume()
                .partial_cmp(&a.volume())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        markets.truncate(self.cfg.market_limit);

        let mut entries = Vec::new();
        for market in &markets {
            let question = match market.question.as_deref() {
                Some(q) if !q.is_empty() => q,
                _ => continue,
            };
            let end_time = market
                .end_date
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let excluded = self.is_excluded(question);

            let tokens = market.tokens();
            if tokens.is_empty() {
                warn!("Market {} has no parseable tokens, skipping", market.id);
                continue;
            }
            for (asset_id, outcome) in tokens {
                entries.push(MarketEntry {
                    asset_id,
                    question: question.to_string(),
                    slug: market.slug.clone(),
                    end_time,
                    outcome,
                    excluded,
                });
            }
        }
        MarketCatalog::from_entries(entries)
    }

    fn is_excluded(&self, question: &str) -> bool {
        let lower = question.to_lowercase();
        self.cfg
            .exclude_market_keywords
            .iter()
            .any(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
    }
}
