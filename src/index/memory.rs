use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::geo::{self, GeoPoint, MAX_SEARCH_RADIUS_KM};
use crate::models::driver::{Driver, DriverStatus};

use super::{AvailabilityIndex, DriverCandidate, IndexError};

// Mirrors the logical layout `drivers:geo` / `drivers:status` /
// `driver:online:<id>`; one lock makes every mutation atomic across the
// three structures.
#[derive(Default)]
struct Inner {
    geo: HashMap<Uuid, GeoPoint>,
    status: HashMap<Uuid, DriverStatus>,
    live_until: HashMap<Uuid, Instant>,
}

impl Inner {
    fn evict_expired(&mut self, now: Instant) {
        let stale: Vec<Uuid> = self
            .live_until
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.geo.remove(&id);
            self.status.remove(&id);
            self.live_until.remove(&id);
            tracing::debug!(driver_id = %id, "evicted stale availability entry");
        }
    }
}

pub struct MemoryIndex {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl AvailabilityIndex for MemoryIndex {
    async fn upsert_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.write().await;
        inner.geo.insert(driver_id, location);
        inner.status.insert(driver_id, DriverStatus::Available);
        inner.live_until.insert(driver_id, Instant::now() + self.ttl);
        Ok(())
    }

    async fn mark_busy(&self, driver_id: Uuid) -> Result<(), IndexError> {
        let mut inner = self.inner.write().await;
        inner.geo.remove(&driver_id);
        inner.status.insert(driver_id, DriverStatus::Busy);
        inner.live_until.remove(&driver_id);
        Ok(())
    }

    async fn mark_offline(&self, driver_id: Uuid) -> Result<(), IndexError> {
        let mut inner = self.inner.write().await;
        inner.geo.remove(&driver_id);
        inner.status.remove(&driver_id);
        inner.live_until.remove(&driver_id);
        Ok(())
    }

    async fn query_near(
        &self,
        origin: &GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<DriverCandidate>, IndexError> {
        let radius_km = radius_km.min(MAX_SEARCH_RADIUS_KM);
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        // Expiry is lazy: overdue entries are dropped when a query touches
        // the index, not by a timer per driver.
        inner.evict_expired(now);

        let mut candidates: Vec<DriverCandidate> = inner
            .geo
            .iter()
            .filter_map(|(id, location)| {
                let distance_km = geo::haversine_km(origin, location);
                (distance_km <= radius_km).then_some(DriverCandidate {
                    driver_id: *id,
                    distance_km,
                })
            })
            .collect();

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        candidates.truncate(limit);
        candidates.retain(|candidate| {
            inner.status.get(&candidate.driver_id) == Some(&DriverStatus::Available)
                && inner
                    .live_until
                    .get(&candidate.driver_id)
                    .is_some_and(|deadline| *deadline > now)
        });
        Ok(candidates)
    }

    async fn reconcile(&self, drivers: Vec<Driver>) -> Result<(), IndexError> {
        let now = Instant::now();
        let now_utc = Utc::now();
        let mut fresh = Inner::default();

        for driver in drivers {
            if !driver.is_active || driver.status == DriverStatus::Offline {
                continue;
            }
            if driver.status == DriverStatus::Busy {
                fresh.status.insert(driver.id, DriverStatus::Busy);
                continue;
            }
            let (Some(location), Some(last_active_at)) = (driver.location, driver.last_active_at)
            else {
                continue;
            };
            let age = (now_utc - last_active_at).to_std().unwrap_or_default();
            let Some(remaining) = self.ttl.checked_sub(age) else {
                continue;
            };
            fresh.geo.insert(driver.id, location);
            fresh.status.insert(driver.id, DriverStatus::Available);
            fresh.live_until.insert(driver.id, now + remaining);
        }

        *self.inner.write().await = fresh;
        Ok(())
    }
}
