use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use pingora_core::{server::ShutdownWatch, services::background::BackgroundService};
use tokio::time::sleep;

use crate::{
    core::status::{mark_ready, StoreKind},
    storage::RequestStore,
};

const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Pings the request store until it answers, then flips readiness.
pub struct StoreProbe {
    store: Arc<dyn RequestStore>,
    kind: StoreKind,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn RequestStore>, kind: StoreKind) -> Self {
        Self { store, kind }
    }
}

#[async_trait]
impl BackgroundService for StoreProbe {
    async fn start(&self, shutdown: ShutdownWatch) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.store.ping().await {
                Ok(()) => {
                    mark_ready(self.kind);
                    return;
                }
                Err(err) => {
                    log::error!("Request store ({}) not reachable: {err}", self.kind.as_str());
                    sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }
}
