use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Top-level application config.
///
/// Loaded from an optional `config.yml` with environment variables layered on
/// top, so every tunable can be set as a plain env var (`MIN_USD_SIZE=2500`).
#[derive(Debug, Deserialize, Clone)]
pub struct AppCfg {
    #[serde(default)]
    pub http: HttpCfg,

    // ---- endpoints ----
    #[serde(default = "default_ws_url")]
    pub poly_ws_url: String,
    #[serde(default = "default_gamma_markets_url")]
    pub gamma_markets_url: String,
    #[serde(default = "default_clob_base_url")]
    pub clob_base_url: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    // ---- sink credentials ----
    #[serde(default)]
    pub discord_webhook_url: String,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,

    // ---- filter / signal thresholds ----
    #[serde(default = "default_min_usd_size")]
    pub min_usd_size: f64,
    #[serde(default = "default_whale_threshold_usd")]
    pub whale_threshold_usd: f64,
    #[serde(default = "default_whale_multiplier")]
    pub whale_multiplier: f64,
    #[serde(default = "default_fresh_wallet_max_txs")]
    pub fresh_wallet_max_txs: u64,
    #[serde(default = "default_cluster_window_seconds")]
    pub cluster_window_seconds: u64,
    #[serde(default = "default_cluster_min_wallets")]
    pub cluster_min_wallets: usize,
    #[serde(default = "default_lp_detection_window_ms")]
    pub lp_detection_window_ms: i64,
    #[serde(default = "default_timing_hours_threshold")]
    pub timing_hours_threshold: f64,
    #[serde(default = "default_odds_movement_threshold")]
    pub odds_movement_threshold: f64,
    #[serde(default = "default_contrarian_consensus_threshold")]
    pub contrarian_consensus_threshold: f64,
    #[serde(default = "default_contrarian_min_size_usd")]
    pub contrarian_min_size_usd: f64,
    /// Accepts a YAML sequence, a JSON array string, or a comma list.
    /// Empty means no market is excluded by keyword.
    #[serde(
        default = "default_exclude_market_keywords",
        deserialize_with = "de_keyword_list"
    )]
    pub exclude_market_keywords: Vec<String>,

    // ---- subscription / dispatch ----
    #[serde(default = "default_market_limit")]
    pub market_limit: usize,
    #[serde(default = "default_alerts_per_second")]
    pub alerts_per_second: u32,
    /// 0 = reconnect forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpCfg {
    #[serde(default = "default_ua")]
    pub user_agent: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_pool_idle_timeout")]
    pub pool_idle_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_tcp_keep_alive")]
    pub tcp_keep_alive: Duration,
    #[serde(default = "default_pool")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: default_ua(),
            timeout: default_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            tcp_keep_alive: default_tcp_keep_alive(),
            pool_max_idle_per_host: default_pool(),
        }
    }
}

fn default_ua() -> String {
    "polywatch/0.1".into()
}
fn default_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}
fn default_tcp_keep_alive() -> Duration {
    Duration::from_secs(60)
}
fn default_pool() -> usize {
    16
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}
fn default_gamma_markets_url() -> String {
    "https://gamma-api.polymarket.com/markets".to_string()
}
fn default_clob_base_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}
fn default_min_usd_size() -> f64 {
    2000.0
}
fn default_whale_threshold_usd() -> f64 {
    10_000.0
}
fn default_whale_multiplier() -> f64 {
    5.0
}
fn default_fresh_wallet_max_txs() -> u64 {
    10
}
fn default_cluster_window_seconds() -> u64 {
    60
}
fn default_cluster_min_wallets() -> usize {
    3
}
fn default_lp_detection_window_ms() -> i64 {
    200
}
fn default_timing_hours_threshold() -> f64 {
    24.0
}
fn default_odds_movement_threshold() -> f64 {
    0.05
}
fn default_contrarian_consensus_threshold() -> f64 {
    0.70
}
fn default_contrarian_min_size_usd() -> f64 {
    5000.0
}
fn default_exclude_market_keywords() -> Vec<String> {
    ["Sports", "Football", "NBA", "NFL"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_market_limit() -> usize {
    100
}
fn default_alerts_per_second() -> u32 {
    1
}

/// Parse a keyword list from a raw string: a JSON array (`["Sports","NBA"]`)
/// or a comma-separated list (`Sports, NBA`).
pub fn parse_keyword_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return items;
        }
    }
    trimmed
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn de_keyword_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(items) => Ok(items),
        Raw::Text(text) => Ok(parse_keyword_list(&text)),
    }
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.poly_ws_url.is_empty(), "POLY_WS_URL missing");
        anyhow::ensure!(
            !self.gamma_markets_url.is_empty(),
            "GAMMA_MARKETS_URL missing"
        );
        anyhow::ensure!(!self.clob_base_url.is_empty(), "CLOB_BASE_URL missing");
        anyhow::ensure!(!self.rpc_url.is_empty(), "RPC_URL missing");
        anyhow::ensure!(
            !self.discord_webhook_url.is_empty(),
            "DISCORD_WEBHOOK_URL missing"
        );
        anyhow::ensure!(
            !self.telegram_bot_token.is_empty(),
            "TELEGRAM_BOT_TOKEN missing"
        );
        anyhow::ensure!(!self.telegram_chat_id.is_empty(), "TELEGRAM_CHAT_ID missing");
        anyhow::ensure!(self.min_usd_size >= 0.0, "MIN_USD_SIZE must be >= 0");
        anyhow::ensure!(self.whale_multiplier > 0.0, "WHALE_MULTIPLIER must be > 0");
        anyhow::ensure!(
            self.cluster_min_wallets >= 1,
            "CLUSTER_MIN_WALLETS must be >= 1"
        );
        anyhow::ensure!(
            (0.5..=1.0).contains(&self.contrarian_consensus_threshold),
            "CONTRARIAN_CONSENSUS_THRESHOLD must be in [0.5, 1.0]"
        );
        anyhow::ensure!(self.market_limit >= 1, "MARKET_LIMIT must be >= 1");
        anyhow::ensure!(self.alerts_per_second >= 1, "ALERTS_PER_SECOND must be >= 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_env_var_override() {
        env::set_var("MIN_USD_SIZE", "3500");

        let cfg = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()
            .unwrap();

        let val = cfg.get_float("min_usd_size").unwrap();
        assert!((val - 3500.0).abs() < f64::EPSILON);

        env::remove_var("MIN_USD_SIZE");
    }

    #[test]
    fn test_keyword_list_parsing() {
        assert_eq!(
            parse_keyword_list(r#"["Sports", "Football"]"#),
            vec!["Sports".to_string(), "Football".to_string()]
        );
        assert_eq!(
            parse_keyword_list("Sports, NBA"),
            vec!["Sports".to_string(), "NBA".to_string()]
        );
        assert_eq!(
            parse_keyword_list(r#""Crypto", 'NFL'"#),
            vec!["Crypto".to_string(), "NFL".to_string()]
        );
        assert!(parse_keyword_list("").is_empty());
        assert!(parse_keyword_list("  ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let cfg: AppCfg = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!((cfg.min_usd_size - 2000.0).abs() < f64::EPSILON);
        assert!((cfg.whale_threshold_usd - 10_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.cluster_min_wallets, 3);
        assert_eq!(cfg.lp_detection_window_ms, 200);
        assert_eq!(cfg.market_limit, 100);
        assert_eq!(cfg.alerts_per_second, 1);
        assert_eq!(cfg.max_reconnect_attempts, 0);
        assert_eq!(cfg.exclude_market_keywords.len(), 4);
        // sink credentials have no defaults and fail validation
        assert!(cfg.validate().is_err());
    }
}
