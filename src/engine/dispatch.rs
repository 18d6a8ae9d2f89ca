use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DispatchMode;
use crate::engine::matching::MatchCandidate;
use crate::engine::{deliveries, drivers, estimates, matching, offers};
use crate::error::AppError;
use crate::geo;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct DispatchJob {
    pub delivery_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Assigned { driver_id: Uuid },
    Offered { offer_id: Uuid },
    NoDrivers,
    Skipped,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Assigned { .. } => "assigned",
            DispatchOutcome::Offered { .. } => "offered",
            DispatchOutcome::NoDrivers => "no_drivers",
            DispatchOutcome::Skipped => "skipped",
        }
    }
}

pub async fn enqueue(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    state
        .dispatch_tx
        .send(job)
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

    state.metrics.deliveries_in_queue.inc();
    Ok(())
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut job_rx: mpsc::Receiver<DispatchJob>) {
    info!("dispatch engine started");

    while let Some(job) = job_rx.recv().await {
        state.metrics.deliveries_in_queue.dec();

        let start = Instant::now();
        match process_job(&state, job.delivery_id).await {
            Ok(outcome) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&[outcome.label()])
                    .observe(elapsed);
                state
                    .metrics
                    .dispatches_total
                    .with_label_values(&[outcome.label()])
                    .inc();
            }
            Err(err) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                state
                    .metrics
                    .dispatches_total
                    .with_label_values(&["error"])
                    .inc();
                error!(
                    delivery_id = %job.delivery_id,
                    error = %err,
                    "failed to dispatch delivery"
                );
            }
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}

/// One dispatch attempt. A delivery that left PENDING while queued is
/// skipped, never re-matched.
pub async fn process_job(state: &AppState, delivery_id: Uuid) -> Result<DispatchOutcome, AppError> {
    let delivery = deliveries::get_delivery(state, delivery_id).await?;
    if delivery.status != DeliveryStatus::Pending {
        info!(
            delivery_id = %delivery_id,
            status = %delivery.status,
            "delivery no longer pending; skipping dispatch"
        );
        return Ok(DispatchOutcome::Skipped);
    }

    let candidates = matching::find_candidates(
        state,
        &delivery.pickup,
        state.config.default_radius_km,
        state.config.max_candidates,
    )
    .await?;
    if candidates.is_empty() {
        info!(delivery_id = %delivery_id, "no driver available; delivery stays pending");
        return Ok(DispatchOutcome::NoDrivers);
    }

    match state.config.dispatch_mode {
        DispatchMode::Immediate => assign_immediately(state, &delivery, &candidates[0]).await,
        DispatchMode::Offer => offer_to_best(state, &delivery, &candidates).await,
    }
}

async fn assign_immediately(
    state: &AppState,
    delivery: &Delivery,
    candidate: &MatchCandidate,
) -> Result<DispatchOutcome, AppError> {
    let drop_leg = geo::haversine_km(&delivery.pickup, &delivery.drop_off);
    deliveries::assign_driver(
        state,
        delivery.id,
        candidate.driver.id,
        estimates::round2(candidate.distance_km),
        estimates::round2(drop_leg),
    )
    .await?;
    drivers::occupy_driver(state, candidate.driver.id).await?;
    Ok(DispatchOutcome::Assigned {
        driver_id: candidate.driver.id,
    })
}

async fn offer_to_best(
    state: &AppState,
    delivery: &Delivery,
    candidates: &[MatchCandidate],
) -> Result<DispatchOutcome, AppError> {
    for candidate in candidates {
        // A driver already weighing an offer is left alone.
        if state
            .store
            .pending_offer_for_driver(candidate.driver.id)
            .await?
            .is_some()
        {
            continue;
        }
        let offer = offers::create_offer(state, candidate.driver.id, delivery.id, None).await?;
        return Ok(DispatchOutcome::Offered { offer_id: offer.id });
    }

    info!(
        delivery_id = %delivery.id,
        "every candidate is weighing another offer; delivery stays pending"
    );
    Ok(DispatchOutcome::NoDrivers)
}
