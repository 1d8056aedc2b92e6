mod bus;
mod catalog;
mod config;
mod core;
mod detect;
mod dispatch;
mod enrich;
mod filter;
mod signals;
mod stats;
mod stream;
mod wallet;

use crate::bus::types::Bus;
use crate::catalog::loader::CatalogLoader;
use crate::config::config::AppCfg;
use crate::core::types::Actor;
use crate::detect::actor::DetectActor;
use crate::dispatch::actor::DispatchActor;
use crate::dispatch::discord::DiscordSink;
use crate::dispatch::sink::Sink;
use crate::dispatch::telegram::TelegramSink;
use crate::enrich::enricher::Enricher;
use crate::stream::actor::StreamActor;
use crate::wallet::actor::WalletLookupActor;
use crate::wallet::client::PolygonRpcClient;

use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

/// Join actors as they finish. Any actor erroring or panicking cancels the
/// rest; returns whether a failure was seen.
async fn supervise(actors: &mut JoinSet<anyhow::Result<()>>, shutdown: &CancellationToken) -> bool {
    let mut failed = false;
    while let Some(res) = actors.join_next().await {
        match res {
            Ok(Ok(())) => info!("Actor exited cleanly"),
            Ok(Err(e)) => {
                error!(?e, "Actor returned error; shutting down");
                failed = true;
                shutdown.cancel();
            }
            Err(panic) => {
                error!(?panic, "Actor panicked; shutting down");
                failed = true;
                shutdown.cancel();
            }
        }
    }
    failed
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .with_current_span(false)
        .init();
    dotenv::dotenv().ok();

    // Prometheus exporter + /metrics endpoint
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
        match tokio::net::TcpListener::bind("0.0.0.0:9000").await {
            Ok(listener) => {
                info!("Metrics endpoint listening on 0.0.0.0:9000/metrics");
                if let Err(e) = axum::serve(listener, app).await {
                    error!("Metrics server error: {e}");
                }
            }
            Err(e) => error!("Failed to bind metrics endpoint: {e}"),
        }
    });

    metrics::counter!("polywatch_startups_total").increment(1);

    // fatal startup error: exit 1
    let cfg = match AppCfg::load("config") {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    // Root span for the supervisor/main thread
    let span = info_span!(
        "Supervisor",
        pid = %std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
    );
    let _enter = span.enter();

    info!("Starting up");
    info!("Min USD size: ${:.0}", cfg.min_usd_size);
    info!("Whale threshold: ${:.0}", cfg.whale_threshold_usd);
    info!("Fresh wallet max txs: {}", cfg.fresh_wallet_max_txs);
    info!("Cluster window: {}s", cfg.cluster_window_seconds);
    info!("Excluded keywords: {:?}", cfg.exclude_market_keywords);

    info!("Initializing HTTP client");
    let client = Client::builder()
        .use_rustls_tls()
        .user_agent(cfg.http.user_agent.clone())
        .pool_idle_timeout(cfg.http.pool_idle_timeout)
        .pool_max_idle_per_host(cfg.http.pool_max_idle_per_host)
        .tcp_keepalive(cfg.http.tcp_keep_alive)
        .timeout(cfg.http.timeout)
        .build()
        .expect("client");

    info!("Loading market catalog");
    let catalog = match CatalogLoader::new(client.clone(), cfg.clone()).load().await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Fatal: market catalog unavailable: {e:#}");
            std::process::exit(1);
        }
    };

    info!("Initializing shared pub/sub Bus");
    let bus = Bus::new();
    let shutdown = CancellationToken::new();

    info!("Building actors");
    let stream = StreamActor::new(
        bus.clone(),
        cfg.clone(),
        catalog.asset_ids().to_vec(),
        shutdown.clone(),
    );
    let detect = DetectActor::new(bus.clone(), shutdown.clone(), catalog.clone(), &cfg);
    let wallet = WalletLookupActor::new(
        bus.clone(),
        Arc::new(PolygonRpcClient::new(client.clone(), cfg.rpc_url.clone())),
        shutdown.clone(),
    );
    let sinks: Vec<Arc<dyn Sink>> = vec![
        Arc::new(DiscordSink::new(
            client.clone(),
            cfg.discord_webhook_url.clone(),
        )),
        Arc::new(TelegramSink::new(
            client.clone(),
            cfg.telegram_bot_token.clone(),
            cfg.telegram_chat_id.clone(),
        )),
    ];
    let enricher = Enricher::new(client.clone(), cfg.clob_base_url.clone());
    let dispatch = DispatchActor::new(
        bus.clone(),
        shutdown.clone(),
        enricher,
        sinks,
        cfg.alerts_per_second,
    );

    info!("Spawning actors");
    let mut actors = JoinSet::new();
    actors.spawn(stream.run().instrument(info_span!("Stream")));
    actors.spawn(detect.run().instrument(info_span!("Detect")));
    actors.spawn(wallet.run().instrument(info_span!("Wallet")));
    actors.spawn(dispatch.run().instrument(info_span!("Dispatch")));

    let mut runtime_failure = false;
    tokio::select! {
        failed = supervise(&mut actors, &shutdown) => runtime_failure = failed,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down supervisor loop");
            shutdown.cancel();
        }
    }

    info!("Waiting for graceful shutdown of actors");
    if supervise(&mut actors, &shutdown).await {
        runtime_failure = true;
    }

    info!("Supervisor exit");
    if runtime_failure {
        // unrecoverable runtime error (e.g. reconnect budget exhausted)
        std::process::exit(2);
    }
}
