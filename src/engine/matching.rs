use tracing::warn;

use crate::error::AppError;
use crate::geo::{self, GeoPoint, MAX_SEARCH_RADIUS_KM};
use crate::models::driver::{Driver, DriverStatus};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub driver: Driver,
    pub distance_km: f64,
}

/// Primary path queries the availability index; on index failure the
/// durable store is scanned instead. Both paths rank identically.
pub async fn find_candidates(
    state: &AppState,
    pickup: &GeoPoint,
    radius_km: f64,
    limit: usize,
) -> Result<Vec<MatchCandidate>, AppError> {
    match state.index.query_near(pickup, radius_km, limit).await {
        Ok(hits) => {
            let mut candidates = Vec::with_capacity(hits.len());
            for hit in hits {
                // Index entries can trail the store; recheck before use.
                let Some(driver) = state.store.driver(hit.driver_id).await? else {
                    continue;
                };
                if !driver.is_active || driver.status != DriverStatus::Available {
                    continue;
                }
                candidates.push(MatchCandidate {
                    driver,
                    distance_km: hit.distance_km,
                });
            }
            rank(&mut candidates);
            Ok(candidates)
        }
        Err(err) => {
            warn!(error = %err, "availability index query failed; scanning the store");
            fallback_scan(state, pickup, radius_km, limit).await
        }
    }
}

async fn fallback_scan(
    state: &AppState,
    pickup: &GeoPoint,
    radius_km: f64,
    limit: usize,
) -> Result<Vec<MatchCandidate>, AppError> {
    let radius_km = radius_km.min(MAX_SEARCH_RADIUS_KM);
    let mut candidates = Vec::new();

    for driver in state.store.drivers().await? {
        if !driver.is_active || driver.status != DriverStatus::Available {
            continue;
        }
        let Some(location) = driver.location else {
            continue;
        };
        let distance_km = geo::haversine_km(pickup, &location);
        if distance_km <= radius_km {
            candidates.push(MatchCandidate {
                driver,
                distance_km,
            });
        }
    }

    rank(&mut candidates);
    candidates.truncate(limit);
    Ok(candidates)
}

// Ties break toward the most recently active driver so both paths rank
// identically for the same inputs.
fn rank(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| b.driver.last_active_at.cmp(&a.driver.last_active_at))
    });
}
