use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{deliveries, drivers, estimates};
use crate::error::AppError;
use crate::geo;
use crate::models::delivery::DeliveryStatus;
use crate::models::driver::DriverStatus;
use crate::models::offer::{Offer, OfferStatus, RejectionReason};
use crate::realtime::protocol::Outbound;
use crate::state::AppState;

pub const MIN_OFFER_EXPIRY_SECS: u64 = 10;
pub const MAX_OFFER_EXPIRY_SECS: u64 = 120;

pub async fn create_offer(
    state: &AppState,
    driver_id: Uuid,
    delivery_id: Uuid,
    expires_in_secs: Option<u64>,
) -> Result<Offer, AppError> {
    let expiry_secs = expires_in_secs.unwrap_or(state.config.offer_expiry_secs);
    if !(MIN_OFFER_EXPIRY_SECS..=MAX_OFFER_EXPIRY_SECS).contains(&expiry_secs) {
        return Err(AppError::BadRequest(format!(
            "expires_in_secs must be within [{MIN_OFFER_EXPIRY_SECS}, {MAX_OFFER_EXPIRY_SECS}]"
        )));
    }

    let driver = drivers::get_driver(state, driver_id).await?;
    if !driver.is_active {
        return Err(AppError::Conflict(format!("driver {driver_id} is disabled")));
    }
    if driver.status != DriverStatus::Available {
        return Err(AppError::Conflict(format!(
            "driver {driver_id} is not available"
        )));
    }
    let Some(driver_location) = driver.location else {
        return Err(AppError::Conflict(format!(
            "driver {driver_id} has no known location"
        )));
    };

    let delivery = deliveries::get_delivery(state, delivery_id).await?;
    if delivery.status != DeliveryStatus::Pending {
        return Err(AppError::Conflict(format!(
            "delivery {delivery_id} is not pending"
        )));
    }
    if state
        .store
        .pending_offer_for_delivery(delivery_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "delivery {delivery_id} already has a pending offer"
        )));
    }
    if state
        .store
        .pending_offer_for_driver(driver_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "driver {driver_id} already has a pending offer"
        )));
    }

    let now = Utc::now();
    let payload = estimates::offer_payload(
        &driver_location,
        &delivery.pickup,
        delivery.pickup_label.clone(),
        &delivery.drop_off,
        now,
    );
    let offer = Offer {
        id: Uuid::new_v4(),
        delivery_id,
        driver_id,
        status: OfferStatus::Pending,
        payload: payload.clone(),
        created_at: now,
        expires_at: now + Duration::seconds(expiry_secs as i64),
        accepted_at: None,
        rejected_at: None,
        rejection_reason: None,
        response_time_ms: None,
    };
    state.store.insert_offer(offer.clone()).await?;

    let pushed = state.hub.send(
        driver_id,
        Outbound::OfferCreated {
            offer_id: offer.id,
            delivery_id,
            expires_at: offer.expires_at,
            payload,
        },
    );
    if !pushed {
        debug!(driver_id = %driver_id, "driver channel closed; offer not pushed");
    }

    info!(
        offer_id = %offer.id,
        delivery_id = %delivery_id,
        driver_id = %driver_id,
        expires_at = %offer.expires_at,
        "offer created"
    );
    Ok(offer)
}

/// Single-winner resolution. Runs under the per-offer lock so a sweep or a
/// second submission observes the settled status, never a half-applied one.
pub async fn accept_offer(
    state: &AppState,
    driver_id: Uuid,
    offer_id: Uuid,
) -> Result<Offer, AppError> {
    let lock = state.offer_lock(offer_id);
    let _guard = lock.lock().await;

    let mut offer = fetch_owned(state, driver_id, offer_id).await?;
    if offer.status != OfferStatus::Pending {
        return Err(AppError::Conflict("offer already processed".to_string()));
    }
    let now = Utc::now();
    if offer.expires_at <= now {
        expire(state, offer).await?;
        return Err(AppError::Conflict("offer has expired".to_string()));
    }

    let delivery = deliveries::get_delivery(state, offer.delivery_id).await?;
    if delivery.status != DeliveryStatus::Pending || delivery.driver_id.is_some() {
        // The delivery moved on while the offer was outstanding.
        expire(state, offer).await?;
        return Err(AppError::Conflict(format!(
            "delivery {} is no longer pending",
            delivery.id
        )));
    }

    let driver = drivers::get_driver(state, driver_id).await?;
    if !driver.is_active {
        return Err(AppError::Conflict(format!("driver {driver_id} is disabled")));
    }

    offer.status = OfferStatus::Accepted;
    offer.accepted_at = Some(now);
    offer.response_time_ms = Some((now - offer.created_at).num_milliseconds().max(0));
    state.store.update_offer(offer.clone()).await?;

    state
        .metrics
        .offers_total
        .with_label_values(&["accepted"])
        .inc();
    if let Some(ms) = offer.response_time_ms {
        state
            .metrics
            .offer_response_seconds
            .observe(ms as f64 / 1000.0);
    }

    let drop_leg = geo::haversine_km(&delivery.pickup, &delivery.drop_off);
    let pickup_leg = driver
        .location
        .map(|location| geo::haversine_km(&location, &delivery.pickup))
        .unwrap_or((offer.payload.estimated_distance_km - drop_leg).max(0.0));
    deliveries::assign_driver(
        state,
        delivery.id,
        driver_id,
        estimates::round2(pickup_leg),
        estimates::round2(drop_leg),
    )
    .await?;
    drivers::occupy_driver(state, driver_id).await?;

    info!(
        offer_id = %offer.id,
        delivery_id = %delivery.id,
        driver_id = %driver_id,
        response_time_ms = offer.response_time_ms,
        "offer accepted"
    );
    Ok(offer)
}

pub async fn reject_offer(
    state: &AppState,
    driver_id: Uuid,
    offer_id: Uuid,
    reason: Option<RejectionReason>,
) -> Result<Offer, AppError> {
    let lock = state.offer_lock(offer_id);
    let _guard = lock.lock().await;

    let mut offer = fetch_owned(state, driver_id, offer_id).await?;
    if offer.status != OfferStatus::Pending {
        return Err(AppError::Conflict("offer already processed".to_string()));
    }
    let now = Utc::now();
    if offer.expires_at <= now {
        expire(state, offer).await?;
        return Err(AppError::Conflict("offer has expired".to_string()));
    }

    offer.status = OfferStatus::Rejected;
    offer.rejected_at = Some(now);
    offer.rejection_reason = reason;
    offer.response_time_ms = Some((now - offer.created_at).num_milliseconds().max(0));
    state.store.update_offer(offer.clone()).await?;

    state
        .metrics
        .offers_total
        .with_label_values(&["rejected"])
        .inc();
    if let Some(ms) = offer.response_time_ms {
        state
            .metrics
            .offer_response_seconds
            .observe(ms as f64 / 1000.0);
    }

    // TODO: re-dispatch to the next candidate once rejection re-queueing lands.
    info!(
        offer_id = %offer.id,
        delivery_id = %offer.delivery_id,
        driver_id = %driver_id,
        reason = ?offer.rejection_reason,
        "offer rejected; delivery remains unassigned"
    );
    Ok(offer)
}

/// Sweeps PENDING offers whose deadline passed. Each expiry re-checks under
/// the offer lock, so accept and reject races are lost gracefully.
pub async fn expire_due_offers(state: &AppState) -> Result<usize, AppError> {
    let due = state.store.expired_pending_offers(Utc::now()).await?;
    let mut expired = 0usize;
    for candidate in due {
        let lock = state.offer_lock(candidate.id);
        let _guard = lock.lock().await;

        let Some(offer) = state.store.offer(candidate.id).await? else {
            continue;
        };
        // Re-check under the lock; an accept or reject may have won.
        if offer.status != OfferStatus::Pending || offer.expires_at > Utc::now() {
            continue;
        }
        expire(state, offer).await?;
        expired += 1;
    }
    Ok(expired)
}

pub async fn run_offer_sweeper(state: Arc<AppState>) {
    let mut ticker = interval(state.config.offer_sweep_interval());
    info!("offer sweeper started");

    loop {
        ticker.tick().await;
        match expire_due_offers(&state).await {
            Ok(0) => {}
            Ok(count) => info!(count, "expired overdue offers"),
            Err(err) => warn!(error = %err, "offer sweep failed"),
        }
    }
}

// An offer addressed to another driver reads as absent, not forbidden.
async fn fetch_owned(
    state: &AppState,
    driver_id: Uuid,
    offer_id: Uuid,
) -> Result<Offer, AppError> {
    let offer = state
        .store
        .offer(offer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("offer {offer_id}")))?;
    if offer.driver_id != driver_id {
        return Err(AppError::NotFound(format!("offer {offer_id}")));
    }
    Ok(offer)
}

async fn expire(state: &AppState, mut offer: Offer) -> Result<Offer, AppError> {
    offer.status = OfferStatus::Expired;
    state.store.update_offer(offer.clone()).await?;
    state
        .metrics
        .offers_total
        .with_label_values(&["expired"])
        .inc();
    info!(
        offer_id = %offer.id,
        delivery_id = %offer.delivery_id,
        "offer expired"
    );
    Ok(offer)
}
