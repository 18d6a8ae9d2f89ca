use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{self, GeoPoint};
use crate::models::driver::{Driver, DriverStatus};
use crate::state::AppState;

pub async fn create_driver(
    state: &AppState,
    name: String,
    phone: String,
) -> Result<Driver, AppError> {
    let name = name.trim().to_string();
    let phone = phone.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }
    if phone.is_empty() {
        return Err(AppError::BadRequest("phone must not be empty".to_string()));
    }

    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name,
        phone,
        is_active: true,
        status: DriverStatus::Offline,
        location: None,
        last_active_at: None,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_driver(driver.clone()).await?;
    info!(driver_id = %driver.id, "driver created");
    Ok(driver)
}

pub async fn get_driver(state: &AppState, id: Uuid) -> Result<Driver, AppError> {
    state
        .store
        .driver(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id}")))
}

pub async fn set_driver_active(
    state: &AppState,
    id: Uuid,
    is_active: bool,
) -> Result<Driver, AppError> {
    let mut driver = get_driver(state, id).await?;
    driver.is_active = is_active;
    driver.updated_at = Utc::now();
    state.store.update_driver(driver.clone()).await?;

    if !is_active {
        // A disabled driver must drop out of matching immediately.
        if let Err(err) = state.index.mark_offline(id).await {
            warn!(driver_id = %id, error = %err, "failed to drop disabled driver from index");
        }
    }
    info!(driver_id = %id, is_active, "driver active flag updated");
    Ok(driver)
}

pub async fn set_driver_status(
    state: &AppState,
    id: Uuid,
    status: DriverStatus,
) -> Result<Driver, AppError> {
    let mut driver = get_driver(state, id).await?;
    if !driver.is_active {
        return Err(AppError::Conflict(format!("driver {id} is disabled")));
    }

    let now = Utc::now();
    driver.status = status;
    driver.last_active_at = Some(now);
    driver.updated_at = now;
    state.store.update_driver(driver.clone()).await?;
    apply_index_status(state, &driver).await;
    Ok(driver)
}

/// Heartbeat: durable location plus availability refresh. A BUSY driver
/// keeps its status and stays out of the geo set.
pub async fn record_heartbeat(
    state: &AppState,
    id: Uuid,
    location: GeoPoint,
) -> Result<Driver, AppError> {
    geo::validate_point(&location)?;
    let mut driver = get_driver(state, id).await?;
    if !driver.is_active {
        return Err(AppError::Conflict(format!("driver {id} is disabled")));
    }

    let now = Utc::now();
    driver.location = Some(location);
    driver.last_active_at = Some(now);
    if driver.status != DriverStatus::Busy {
        driver.status = DriverStatus::Available;
    }
    driver.updated_at = now;
    state.store.update_driver(driver.clone()).await?;

    if driver.status == DriverStatus::Available {
        if let Err(err) = state.index.upsert_location(id, location).await {
            warn!(driver_id = %id, error = %err, "availability index update failed");
        }
    }
    Ok(driver)
}

pub async fn occupy_driver(state: &AppState, id: Uuid) -> Result<Driver, AppError> {
    set_driver_status(state, id, DriverStatus::Busy).await
}

/// Called after a terminal delivery transition. A still-enabled driver
/// returns to matching; a disabled one goes offline.
pub async fn free_driver(state: &AppState, id: Uuid) -> Result<Driver, AppError> {
    let driver = get_driver(state, id).await?;
    if !driver.is_active {
        let mut driver = driver;
        driver.status = DriverStatus::Offline;
        driver.updated_at = Utc::now();
        state.store.update_driver(driver.clone()).await?;
        apply_index_status(state, &driver).await;
        return Ok(driver);
    }
    set_driver_status(state, id, DriverStatus::Available).await
}

// Index failures must not undo the durable write.
async fn apply_index_status(state: &AppState, driver: &Driver) {
    let result = match driver.status {
        DriverStatus::Available => match driver.location {
            Some(location) => state.index.upsert_location(driver.id, location).await,
            // Invisible to matching until the first ping lands.
            None => Ok(()),
        },
        DriverStatus::Busy => state.index.mark_busy(driver.id).await,
        DriverStatus::Offline => state.index.mark_offline(driver.id).await,
    };

    if let Err(err) = result {
        warn!(
            driver_id = %driver.id,
            status = %driver.status,
            error = %err,
            "availability index update failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::geo::GeoPoint;
    use crate::models::driver::DriverStatus;
    use crate::state::AppState;

    use super::{
        create_driver, free_driver, occupy_driver, record_heartbeat, set_driver_active,
        set_driver_status,
    };

    const BASE: GeoPoint = GeoPoint {
        lat: 12.9716,
        lon: 77.5946,
    };

    fn test_state() -> Arc<AppState> {
        let (state, _dispatch_rx, _webhook_rx) = AppState::new(Config::default());
        Arc::new(state)
    }

    #[tokio::test]
    async fn create_driver_rejects_blank_fields() {
        let state = test_state();
        assert!(create_driver(&state, "  ".to_string(), "123".to_string())
            .await
            .is_err());
        assert!(create_driver(&state, "Asha".to_string(), "".to_string())
            .await
            .is_err());

        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();
        assert_eq!(driver.status, DriverStatus::Offline);
        assert!(driver.is_active);
    }

    #[tokio::test]
    async fn heartbeat_marks_the_driver_available_and_indexed() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();

        let updated = record_heartbeat(&state, driver.id, BASE).await.unwrap();
        assert_eq!(updated.status, DriverStatus::Available);
        assert_eq!(updated.location, Some(BASE));
        assert!(updated.last_active_at.is_some());

        let found = state.index.query_near(&BASE, 1.0, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, driver.id);
    }

    #[tokio::test]
    async fn busy_driver_heartbeat_keeps_status_and_stays_unmatched() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();
        record_heartbeat(&state, driver.id, BASE).await.unwrap();
        occupy_driver(&state, driver.id).await.unwrap();

        let updated = record_heartbeat(&state, driver.id, BASE).await.unwrap();
        assert_eq!(updated.status, DriverStatus::Busy);

        let found = state.index.query_near(&BASE, 1.0, 10).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn invalid_coordinates_never_reach_the_store() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();

        let result =
            record_heartbeat(&state, driver.id, GeoPoint { lat: 91.0, lon: 0.0 }).await;
        assert!(result.is_err());

        let stored = state.store.driver(driver.id).await.unwrap().unwrap();
        assert!(stored.location.is_none());
    }

    #[tokio::test]
    async fn disabling_a_driver_blocks_heartbeats_and_clears_the_index() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();
        record_heartbeat(&state, driver.id, BASE).await.unwrap();

        set_driver_active(&state, driver.id, false).await.unwrap();
        let found = state.index.query_near(&BASE, 1.0, 10).await.unwrap();
        assert!(found.is_empty());

        assert!(record_heartbeat(&state, driver.id, BASE).await.is_err());
        assert!(
            set_driver_status(&state, driver.id, DriverStatus::Available)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn freeing_a_disabled_driver_sends_it_offline() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();
        record_heartbeat(&state, driver.id, BASE).await.unwrap();
        occupy_driver(&state, driver.id).await.unwrap();
        set_driver_active(&state, driver.id, false).await.unwrap();

        let freed = free_driver(&state, driver.id).await.unwrap();
        assert_eq!(freed.status, DriverStatus::Offline);
    }

    #[tokio::test]
    async fn explicit_offline_clears_the_index() {
        let state = test_state();
        let driver = create_driver(&state, "Asha".to_string(), "+911234567890".to_string())
            .await
            .unwrap();
        record_heartbeat(&state, driver.id, BASE).await.unwrap();

        set_driver_status(&state, driver.id, DriverStatus::Offline)
            .await
            .unwrap();
        let found = state.index.query_near(&BASE, 1.0, 10).await.unwrap();
        assert!(found.is_empty());
    }
}
