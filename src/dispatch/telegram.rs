use crate::core::types::{Alert, Confidence};
use crate::dispatch::sink::{
    classify_response, escape_html, market_url, parse_retry_after, wallet_url, Sink, SinkError,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram Bot API sink: HTML-formatted message to a fixed chat.
pub struct TelegramSink {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(client: Client, bot_token: String, chat_id: String) -> TelegramSink {
        Self {
            client,
            bot_token,
            chat_id,
        }
    }

    fn api_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token)
    }

    fn build_text(&self, alert: &Alert) -> String {
        let trade = &alert.trade;
        let confidence = match alert.confidence {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
        };

        let mut lines = vec![
            format!(
                "<b>ALERT [{confidence}]: {}</b>",
                escape_html(&alert.market_title)
            ),
            String::new(),
            format!("<b>Side:</b> {} {}", trade.side.as_str(), trade.outcome.as_str()),
            format!("<b>Price:</b> {:.2}", trade.price),
            format!("<b>Amount:</b> ${:.0}", trade.usd_value()),
        ];

        let signals: Vec<String> = alert
            .signals
            .iter()
            .map(|s| escape_html(&s.describe()))
            .collect();
        lines.push(format!("<b>Signals:</b> {}", signals.join(" + ")));

        if let Some(tx_count) = alert.wallet_tx_count.filter(|&n| n != u64::MAX) {
            lines.push(format!("<b>Wallet:</b> {tx_count} txs"));
        }
        if let Some(mid) = alert.midpoint {
            lines.push(format!("<b>Book mid:</b> {mid:.2}"));
        }
        if let Some(end) = alert.end_time {
            lines.push(format!(
                "<b>Closes:</b> {}",
                end.format("%Y-%m-%d %H:%M UTC")
            ));
        }

        let mut links = Vec::new();
        if let Some(url) = market_url(alert.market_slug.as_deref()) {
            links.push(format!("<a href=\"{url}\">view market</a>"));
        }
        links.push(format!(
            "<a href=\"{}\">check wallet</a>",
            wallet_url(&trade.wallet)
        ));
        lines.push(String::new());
        lines.push(links.join(" | "));

        lines.join("\n")
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": self.build_text(alert),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(self.api_url())
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
