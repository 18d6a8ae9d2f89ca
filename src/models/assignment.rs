use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub seller_order_id: String,
    pub channel_id: String,
    pub driver_id: Uuid,
    pub distance_to_pickup_km: f64,
    pub distance_pickup_to_drop_km: f64,
    pub created_at: DateTime<Utc>,
}
