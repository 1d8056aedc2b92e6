use crate::bus::types::Bus;
use crate::config::config::AppCfg;
use crate::core::types::{Actor, Outcome, Side, Trade};
use anyhow::Result;
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reconnect after this much silence; any inbound frame resets the timer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long to wait for a subscription ack before assuming we are live.
const SUBSCRIBE_GRACE: Duration = Duration::from_secs(5);
/// The CLOB market channel expects a text PING at least every ~10s.
const PING_INTERVAL: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
/// A session that streams at least this long resets the backoff counter.
const SUSTAINED_STREAMING: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("connect timeout")]
    ConnectTimeout,
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("idle timeout")]
    IdleTimeout,
    #[error("stream ended")]
    StreamEnded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected = 0,
    Connecting = 1,
    Subscribing = 2,
    Streaming = 3,
    Backoff = 4,
}

/// Maintains the upstream CLOB websocket subscription: connect, subscribe,
/// stream, and self-heal with exponential backoff. Parsed trades are
/// published to the bus in arrival order; the reader never blocks on
/// downstream work.
pub struct StreamActor {
    pub bus: Bus,
    pub cfg: AppCfg,
    pub asset_ids: Vec<String>,
    pub shutdown: CancellationToken,
}

impl StreamActor {
    pub fn new(
        bus: Bus,
        cfg: AppCfg,
        asset_ids: Vec<String>,
        shutdown: CancellationToken,
    ) -> StreamActor {
        Self {
            bus,
            cfg,
            asset_ids,
            shutdown,
        }
    }

    /// The subscription frame enumerating every asset id. Same ordered input,
    /// same bytes, so resubscription after a reconnect is identical.
    fn subscribe_frame(&self) -> String {
        serde_json::json!({
            "type": "subscribe",
            "assets_ids": self.asset_ids,
        })
        .to_string()
    }

    fn transition(&self, state: StreamState) {
        debug!(?state, "stream state");
        metrics::gauge!("polywatch_stream_state").set(state as u8 as f64);
    }

    /// One websocket session: connect, subscribe, stream until an error or
    /// shutdown. `streamed_since` reports when (if ever) the session reached
    /// `Streaming`, which drives the backoff reset.
    async fn run_session(&self, streamed_since: &mut Option<Instant>) -> Result<(), StreamError> {
        self.transition(StreamState::Connecting);

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.cfg.poly_ws_url));
        let ws_stream = tokio::select! {
            res = connect => match res {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => return Err(StreamError::Connection(e.to_string())),
                Err(_) => return Err(StreamError::ConnectTimeout),
            },
            _ = self.shutdown.cancelled() => return Ok(()),
        };
        info!(assets = self.asset_ids.len(), "Connected to CLOB websocket");

        let (mut write, mut read) = ws_stream.split();

        self.transition(StreamState::Subscribing);
        write
            .send(Message::Text(self.subscribe_frame().into()))
            .await
            .map_err(|e| StreamError::Subscribe(e.to_string()))?;

        // The first inbound frame (often the subscription ack or a book
        // snapshot) confirms the channel; absent one, go live after the grace.
        let grace = tokio::time::sleep(SUBSCRIBE_GRACE);
        tokio::pin!(grace);
        let mut first_frame = None;
        tokio::select! {
            _ = &mut grace => {}
            msg = read.next() => match msg {
                Some(Ok(m)) => first_frame = Some(m),
                Some(Err(e)) => return Err(StreamError::WebSocket(e.to_string())),
                None => return Err(StreamError::StreamEnded),
            },
            _ = self.shutdown.cancelled() => return Ok(()),
        }

        self.transition(StreamState::Streaming);
        *streamed_since = Some(Instant::now());

        if let Some(msg) = first_frame {
            self.handle_frame(msg, &mut write).await?;
        }

        let idle = tokio::time::sleep(IDLE_TIMEOUT);
        tokio::pin!(idle);
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        ping_timer.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = &mut idle => return Err(StreamError::IdleTimeout),
                _ = ping_timer.tick() => {
                    write
                        .send(Message::Text("PING".into()))
                        .await
                        .map_err(|e| StreamError::WebSocket(e.to_string()))?;
                }
                msg = read.next() => match msg {
                    Some(Ok(m)) => {
                        // any non-empty frame is a heartbeat
                        idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                        self.handle_frame(m, &mut write).await?;
                    }
                    Some(Err(e)) => return Err(StreamError::WebSocket(e.to_string())),
                    None => return Err(StreamError::StreamEnded),
                },
            }
        }
    }

    async fn handle_frame<S>(&self, msg: Message, write: &mut S) -> Result<(), StreamError>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        match msg {
            Message::Text(text) => {
                if text.as_str() == "PONG" {
                    return Ok(());
                }
                self.handle_text(text.as_str()).await;
            }
            Message::Ping(payload) => {
                write
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| StreamError::WebSocket(e.to_string()))?;
            }
            Message::Close(frame) => {
                warn!("Server closed the stream: {:?}", frame);
                return Err(StreamError::StreamEnded);
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse one text frame. Malformed frames are counted and skipped; a bad
    /// payload never costs us the connection.
    async fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                metrics::counter!("polywatch_frames_malformed_total").increment(1);
                debug!("Skipping non-JSON frame: {e}");
                return;
            }
        };

        // the market channel batches events into arrays under load
        if let Some(events) = value.as_array() {
            for event in events {
                self.handle_event(event).await;
            }
        } else {
            self.handle_event(&value).await;
        }
    }

    async fn handle_event(&self, event: &Value) {
        let event_type = event
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("");

        match event_type {
            "trade" => match parse_trade(event) {
                Some(trade) => {
                    metrics::counter!("polywatch_trades_received_total").increment(1);
                    if let Err(e) = self.bus.trades.publish(trade).await {
                        warn!("Failed to publish trade: {e}");
                    }
                }
                None => {
                    metrics::counter!("polywatch_frames_malformed_total").increment(1);
                    warn!("Trade frame with missing or invalid fields");
                }
            },
            // book churn from the same channel; not our concern
            "book" | "price_change" | "tick_size_change" | "last_trade_price" => {}
            "" => debug!("Frame without event_type (subscription ack)"),
            other => debug!("Ignoring event type {other}"),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    exp.min(BACKOFF_MAX)
}

fn json_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn json_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Extract a normalized `Trade` from a trade event. Numeric fields arrive as
/// strings on this feed; accept either form.
fn parse_trade(event: &Value) -> Option<Trade> {
    let asset_id = event.get("asset_id")?.as_str()?.to_string();
    let side = Side::parse(event.get("side")?.as_str()?)?;
    let outcome = Outcome::parse(event.get("outcome")?.as_str()?)?;
    let price = json_f64(event.get("price")?)?;
    let size = json_f64(event.get("size")?)?;
    let wallet = event.get("taker_address")?.as_str()?.to_lowercase();
    let timestamp_ms = json_i64(event.get("timestamp")?)?;
    let trade_id = match event.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    if !(0.0..=1.0).contains(&price) || size < 0.0 {
        return None;
    }

    Some(Trade {
        asset_id,
        side,
        outcome,
        price,
        size,
        wallet,
        timestamp_ms,
        trade_id,
    })
}

#[async_trait::async_trait]
impl Actor for StreamActor {
    async fn run(self) -> Result<()> {
        info!("StreamActor started");
        self.transition(StreamState::Disconnected);

        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let mut streamed_since = None;
            match self.run_session(&mut streamed_since).await {
                Ok(()) => break, // shutdown observed inside the session
                Err(e) => {
                    self.transition(StreamState::Backoff);
                    metrics::counter!("polywatch_stream_reconnects_total").increment(1);

                    if streamed_since.is_some_and(|t| t.elapsed() >= SUSTAINED_STREAMING) {
                        attempt = 0;
                    }
                    let delay = backoff_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "Stream session failed: {e}; reconnecting in {:?} (attempt {attempt})",
                        delay
                    );

                    if self.cfg.max_reconnect_attempts > 0
                        && attempt > self.cfg.max_reconnect_attempts
                    {
                        anyhow::bail!(
                            "reconnect budget exhausted after {} attempts",
                            self.cfg.max_reconnect_attempts
                        );
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }

        self.transition(StreamState::Disconnected);
        info!("StreamActor stopped cleanly");
        Ok(())
    }
}
