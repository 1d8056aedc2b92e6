use crate::core::types::{Alert, Confidence};
use crate::dispatch::sink::{
    classify_response, market_url, parse_retry_after, short_wallet, Sink, SinkError,
};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const COLOR_HIGH: u32 = 15_158_332; // red
const COLOR_MEDIUM: u32 = 15_105_570; // orange

/// Discord webhook sink: one embed per alert.
pub struct DiscordSink {
    client: Client,
    webhook_url: String,
}

impl DiscordSink {
    pub fn new(client: Client, webhook_url: String) -> DiscordSink {
        Self {
            client,
            webhook_url,
        }
    }

    fn build_embed(&self, alert: &Alert) -> Value {
        let trade = &alert.trade;
        let color = match alert.confidence {
            Confidence::High => COLOR_HIGH,
            Confidence::Medium => COLOR_MEDIUM,
        };

        let signal_lines: Vec<String> = alert.signals.iter().map(|s| s.describe()).collect();

        let mut fields = vec![
            json!({
                "name": "Trade",
                "value": format!(
                    "**{} {}** @ {:.2}\n**${:.0}** ({:.0} shares)",
                    trade.side.as_str(),
                    trade.outcome.as_str(),
                    trade.price,
                    trade.usd_value(),
                    trade.size,
                ),
                "inline": true,
            }),
            json!({
                "name": "Signals",
                "value": signal_lines.join("\n"),
                "inline": true,
            }),
        ];

        if let Some(tx_count) = alert.wallet_tx_count.filter(|&n| n != u64::MAX) {
            fields.push(json!({
                "name": "Wallet",
                "value": format!("`{}`\n{} transactions", short_wallet(&trade.wallet), tx_count),
                "inline": true,
            }));
        }

        if let Some(mid) = alert.midpoint {
            let yes = match trade.outcome {
                crate::core::types::Outcome::Yes => mid,
                crate::core::types::Outcome::No => 1.0 - mid,
            };
            fields.push(json!({
                "name": "Current Odds",
                "value": format!("YES: {:.0}% | NO: {:.0}%", yes * 100.0, (1.0 - yes) * 100.0),
                "inline": false,
            }));
        }

        if let Some(end) = alert.end_time {
            fields.push(json!({
                "name": "Closes",
                "value": end.format("%Y-%m-%d %H:%M UTC").to_string(),
                "inline": false,
            }));
        }

        let confidence = match alert.confidence {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
        };
        let traded_at = DateTime::from_timestamp_millis(trade.timestamp_ms)
            .map(|dt| dt.format("%H:%M:%S UTC").to_string())
            .unwrap_or_default();

        let mut embed = json!({
            "title": alert.market_title,
            "description": format!(
                "{} {} for ${:.0} at {:.2}",
                trade.side.as_str(),
                trade.outcome.as_str(),
                trade.usd_value(),
                trade.price,
            ),
            "color": color,
            "fields": fields,
            "footer": { "text": format!("Confidence: {confidence} | {traded_at}") },
        });
        if let Some(url) = market_url(alert.market_slug.as_deref()) {
            embed["url"] = json!(url);
        }
        embed
    }
}

#[async_trait]
impl Sink for DiscordSink {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        let body = json!({ "embeds": [self.build_embed(alert)] });

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| SinkError::Transient(e.to_string()))?;

        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        classify_response(status, retry_after, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outcome, Side, Signal, Trade};
    use chrono::Utc;

    fn alert(confidence: Confidence) -> Alert {
        Alert {
            trade: Trade {
                asset_id: "a1".to_string(),
                side: Side::Buy,
                outcome: Outcome::No,
                price: 0.20,
                size: 30_000.0,
                wallet: "0xdb27bf2ac5d428a9".to_string(),
                timestamp_ms: 1_700_000_000_000,
                trade_id: "t1".to_string(),
            },
            signals: vec![
                Signal::Whale { usd_value: 6000.0, multiplier: None },
                Signal::Contrarian { consensus_yes: 0.82 },
            ],
            confidence,
            market_title: "Will the election be contested?".to_string(),
            market_slug: Some("election-contested".to_string()),
            end_time: Some(Utc::now()),
            wallet_tx_count: Some(4),
            midpoint: Some(0.21),
        }
    }

    #[test]
    fn test_embed_colors_follow_confidence() {
        let sink = DiscordSink::new(Client::new(), "http://localhost".to_string());
        let high = sink.build_embed(&alert(Confidence::High));
        assert_eq!(high["color"], 15_158_332);
        let medium = sink.build_embed(&alert(Confidence::Medium));
        assert_eq!(medium["color"], 15_105_570);
    }

    #[test]
    fn test_embed_carries_evidence_and_link() {
        let sink = DiscordSink::new(Client::new(), "http://localhost".to_string());
        let embed = sink.build_embed(&alert(Confidence::High));

        assert_eq!(embed["title"], "Will the election be contested?");
        assert_eq!(
            embed["url"],
            "https://polymarket.com/event/election-contested"
        );

        let fields = embed["fields"].as_array().unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Trade", "Signals", "Wallet", "Current Odds", "Closes"]);

        let signals = fields[1]["value"].as_str().unwrap();
        assert!(signals.contains("Whale trade ($6000)"));
        assert!(signals.contains("Against 82% YES consensus"));

        // midpoint 0.21 on a NO asset means YES trades at 79%
        assert!(fields[3]["value"].as_str().unwrap().contains("YES: 79%"));
    }

    #[test]
    fn test_embed_omits_missing_enrichment() {
        let sink = DiscordSink::new(Client::new(), "http://localhost".to_string());
        let mut a = alert(Confidence::Medium);
        a.wallet_tx_count = Some(u64::MAX);
        a.midpoint = None;
        a.end_time = None;
        a.market_slug = None;

        let embed = sink.build_embed(&a);
        let fields = embed["fields"].as_array().unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Trade", "Signals"]);
        assert!(embed.get("url").is_none());
    }
}
