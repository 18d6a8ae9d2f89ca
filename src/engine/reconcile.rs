use std::sync::Arc;

use tokio::time::interval;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

/// Periodic full resync of the availability index from the store. The first
/// tick fires immediately, so a restart begins with a rebuilt index.
pub async fn run_index_reconciler(state: Arc<AppState>) {
    let mut ticker = interval(state.config.reconcile_interval());
    info!("index reconciler started");

    loop {
        ticker.tick().await;
        match resync(&state).await {
            Ok(count) => info!(drivers = count, "availability index reconciled"),
            Err(err) => warn!(error = %err, "index reconcile failed"),
        }
    }
}

pub async fn resync(state: &AppState) -> Result<usize, AppError> {
    let drivers = state.store.drivers().await?;
    let count = drivers.len();
    state.index.reconcile(drivers).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::engine::drivers;
    use crate::geo::GeoPoint;
    use crate::index::memory::MemoryIndex;
    use crate::state::AppState;

    use super::resync;

    const BASE: GeoPoint = GeoPoint {
        lat: 12.9716,
        lon: 77.5946,
    };

    #[tokio::test]
    async fn resync_rebuilds_a_cold_index() {
        let config = Config::default();
        let (state, _dispatch_rx, _webhook_rx) = AppState::new(config.clone());
        let state = Arc::new(state);

        let driver = drivers::create_driver(&state, "Asha".to_string(), "+911111111111".to_string())
            .await
            .unwrap();
        drivers::record_heartbeat(&state, driver.id, BASE)
            .await
            .unwrap();

        // A replacement index starts cold, as after a process restart.
        let cold = Arc::new(MemoryIndex::new(config.liveness_ttl()));
        let (state, _dispatch_rx2, _webhook_rx2) =
            AppState::with_parts(config, state.store.clone(), cold);

        assert!(state.index.query_near(&BASE, 1.0, 10).await.unwrap().is_empty());
        assert_eq!(resync(&state).await.unwrap(), 1);

        let found = state.index.query_near(&BASE, 1.0, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, driver.id);
    }
}
