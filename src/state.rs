use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatch::DispatchJob;
use crate::index::{AvailabilityIndex, MemoryIndex};
use crate::observability::metrics::Metrics;
use crate::realtime::hub::Hub;
use crate::store::{MemoryStore, Store};
use crate::webhook::WebhookEvent;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub index: Arc<dyn AvailabilityIndex>,
    pub hub: Hub,
    pub metrics: Metrics,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub webhook_tx: mpsc::Sender<WebhookEvent>,
    offer_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(
        config: Config,
    ) -> (
        Self,
        mpsc::Receiver<DispatchJob>,
        mpsc::Receiver<WebhookEvent>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new(config.liveness_ttl()));
        Self::with_parts(config, store, index)
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        index: Arc<dyn AvailabilityIndex>,
    ) -> (
        Self,
        mpsc::Receiver<DispatchJob>,
        mpsc::Receiver<WebhookEvent>,
    ) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let (webhook_tx, webhook_rx) = mpsc::channel(config.webhook_queue_size);

        (
            Self {
                config,
                store,
                index,
                hub: Hub::new(),
                metrics: Metrics::new(),
                dispatch_tx,
                webhook_tx,
                offer_locks: DashMap::new(),
            },
            dispatch_rx,
            webhook_rx,
        )
    }

    // One async mutex per offer id, the in-process stand-in for a row lock.
    pub fn offer_lock(&self, offer_id: Uuid) -> Arc<Mutex<()>> {
        self.offer_locks
            .entry(offer_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::config::Config;
    use crate::state::AppState;

    #[tokio::test]
    async fn offer_lock_is_stable_per_offer() {
        let (state, _dispatch_rx, _webhook_rx) = AppState::new(Config::default());

        let offer_id = Uuid::new_v4();
        let first = state.offer_lock(offer_id);
        let second = state.offer_lock(offer_id);
        let other = state.offer_lock(Uuid::new_v4());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
