use crate::core::types::Alert;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const ODDS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

/// Best-effort odds enrichment for alerts about to be dispatched. Runs after
/// pacing, never on the ingestion path; any failure simply ships the alert
/// without a midpoint.
pub struct Enricher {
    client: Client,
    clob_base_url: String,
}

impl Enricher {
    pub fn new(client: Client, clob_base_url: String) -> Enricher {
        Self {
            client,
            clob_base_url,
        }
    }

    pub async fn enrich(&self, mut alert: Alert) -> Alert {
        if alert.midpoint.is_none() {
            alert.midpoint = self.fetch_midpoint(&alert.trade.asset_id).await;
        }
        alert
    }

    async fn fetch_midpoint(&self, asset_id: &str) -> Option<f64> {
        let url = format!("{}/book", self.clob_base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("token_id", asset_id)])
            .timeout(ODDS_TIMEOUT)
            .send()
            .await
            .map_err(|e| debug!("Odds fetch failed for {asset_id}: {e}"))
            .ok()?;

        if !resp.status().is_success() {
            debug!("Odds fetch for {asset_id} returned {}", resp.status());
            return None;
        }

        let book: BookResponse = resp
            .json()
            .await
            .map_err(|e| debug!("Odds parse failed for {asset_id}: {e}"))
            .ok()?;
        midpoint_of(&book)
    }
}

/// Midpoint of best bid and best ask; level ordering is not trusted.
fn midpoint_of(book: &BookResponse) -> Option<f64> {
    let best_bid = book
        .bids
        .iter()
        .filter_map(|l| l.price.parse::<f64>().ok())
        .reduce(f64::max)?;
    let best_ask = book
        .asks
        .iter()
        .filter_map(|l| l.price.parse::<f64>().ok())
        .reduce(f64::min)?;
    Some((best_bid + best_ask) / 2.0)
}
