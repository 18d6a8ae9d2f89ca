use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::driver::Driver;

pub mod memory;

pub use memory::MemoryIndex;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("availability index unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
}

/// Fast lookup of who is available near a point. The durable store stays
/// the source of truth; callers revalidate every candidate there before
/// acting on it.
#[async_trait]
pub trait AvailabilityIndex: Send + Sync {
    /// Insert or refresh the geo entry, set status AVAILABLE and push the
    /// liveness deadline out by the index TTL, all under one lock.
    async fn upsert_location(&self, driver_id: Uuid, location: GeoPoint)
        -> Result<(), IndexError>;

    /// Remove the geo entry and record BUSY. A busy driver keeps no
    /// liveness deadline; re-entering the geo set requires a fresh ping.
    async fn mark_busy(&self, driver_id: Uuid) -> Result<(), IndexError>;

    /// Drop the driver from all three structures.
    async fn mark_offline(&self, driver_id: Uuid) -> Result<(), IndexError>;

    /// Nearest available drivers within `radius_km` (clamped to the global
    /// maximum), ordered by ascending distance, at most `limit` results.
    async fn query_near(
        &self,
        origin: &GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<DriverCandidate>, IndexError>;

    /// Replace the index content from a durable snapshot. Deadlines derive
    /// from each driver's `last_active_at`, so silent drivers stay out.
    async fn reconcile(&self, drivers: Vec<Driver>) -> Result<(), IndexError>;
}
