use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    TooFar,
    NoTime,
    BadArea,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferPayload {
    pub pickup: GeoPoint,
    pub pickup_label: Option<String>,
    pub estimated_pickup_minutes: u32,
    pub estimated_completion_at: DateTime<Utc>,
    pub estimated_distance_km: f64,
    pub estimated_earning: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub payload: OfferPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<RejectionReason>,
    pub response_time_ms: Option<i64>,
}
