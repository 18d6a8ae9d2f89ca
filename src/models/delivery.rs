use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Assigned => "ASSIGNED",
            DeliveryStatus::PickedUp => "PICKED_UP",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DeliveryStatus::Pending => false,
            DeliveryStatus::Assigned => *self == DeliveryStatus::Pending,
            DeliveryStatus::PickedUp => *self == DeliveryStatus::Assigned,
            DeliveryStatus::InTransit => *self == DeliveryStatus::PickedUp,
            DeliveryStatus::Delivered => {
                matches!(self, DeliveryStatus::PickedUp | DeliveryStatus::InTransit)
            }
            DeliveryStatus::Failed | DeliveryStatus::Cancelled => true,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofType {
    Pickup,
    Delivery,
}

impl ProofType {
    pub fn target_status(&self) -> DeliveryStatus {
        match self {
            ProofType::Pickup => DeliveryStatus::PickedUp,
            ProofType::Delivery => DeliveryStatus::Delivered,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub seller_order_id: String,
    pub channel_id: String,
    pub pickup: GeoPoint,
    pub pickup_label: Option<String>,
    pub drop_off: GeoPoint,
    pub status: DeliveryStatus,
    pub driver_id: Option<Uuid>,
    pub pickup_proof_url: Option<String>,
    pub delivery_proof_url: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub seller_order_id: String,
    pub event_type: DeliveryStatus,
    pub proof_url: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
