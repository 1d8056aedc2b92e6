use crate::bus::types::Bus;
use crate::core::types::{Actor, WalletUpdate};
use crate::wallet::client::WalletClient;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Serves wallet tx-count lookups off the hot path. The detection stage
/// publishes requests and stays synchronous; results flow back as
/// `WalletUpdate`s that detection (the cache's single writer) applies.
pub struct WalletLookupActor {
    pub bus: Bus,
    pub client: Arc<dyn WalletClient>,
    pub shutdown: CancellationToken,
}

impl WalletLookupActor {
    pub fn new(
        bus: Bus,
        client: Arc<dyn WalletClient>,
        shutdown: CancellationToken,
    ) -> WalletLookupActor {
        Self {
            bus,
            client,
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl Actor for WalletLookupActor {
    async fn run(self) -> Result<()> {
        info!("WalletLookupActor started");
        let mut rx = self.bus.wallet_requests.subscribe();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("WalletLookupActor: shutdown requested");
                    break;
                }

                res = rx.recv() => {
                    match res {
                        Ok(req) => {
                            // a failed lookup is reported as u64::MAX so the
                            // freshness check fails closed downstream
                            let tx_count = match self.client.transaction_count(&req.wallet).await {
                                Ok(n) => n,
                                Err(e) => {
                                    warn!("Wallet lookup failed for {}: {:#}", req.wallet, e);
                                    metrics::counter!("polywatch_wallet_lookup_failures_total")
                                        .increment(1);
                                    u64::MAX
                                }
                            };
                            let update = WalletUpdate {
                                wallet: req.wallet.clone(),
                                tx_count,
                            };
                            if let Err(e) = self.bus.wallet_updates.publish(update).await {
                                error!("Failed to publish wallet update: {e}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "WalletLookupActor lagged on wallet_requests");
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("WalletLookupActor request channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("WalletLookupActor stopped cleanly");
        Ok(())
    }
}
