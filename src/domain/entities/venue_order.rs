use crate::domain::entities::venue::Venue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueOrderStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Failed,
}

impl VenueOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VenueOrderStatus::Filled | VenueOrderStatus::Cancelled | VenueOrderStatus::Failed
        )
    }

    /// Lifecycle: pending -> {submitted, failed}, submitted -> {filled,
    /// cancelled}. Terminal states never transition.
    pub fn can_transition_to(&self, next: VenueOrderStatus) -> bool {
        match self {
            VenueOrderStatus::Pending => {
                matches!(next, VenueOrderStatus::Submitted | VenueOrderStatus::Failed)
            }
            VenueOrderStatus::Submitted => {
                matches!(next, VenueOrderStatus::Filled | VenueOrderStatus::Cancelled)
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueOrderStatus::Pending => "pending",
            VenueOrderStatus::Submitted => "submitted",
            VenueOrderStatus::Filled => "filled",
            VenueOrderStatus::Cancelled => "cancelled",
            VenueOrderStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSource {
    Manual,
    Auto,
}

impl OrderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSource::Manual => "manual",
            OrderSource::Auto => "auto",
        }
    }
}

/// An order routed to an external venue, persisted across its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrder {
    pub id: String,
    pub user_id: String,
    pub venue: Venue,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub price: Option<f64>,
    pub quantity: f64,
    pub status: VenueOrderStatus,
    pub exchange_order_id: Option<String>,
    pub filled_qty: f64,
    pub filled_price: f64,
    pub fee: f64,
    pub source: OrderSource,
    pub ai_signal_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        let s = VenueOrderStatus::Pending;
        assert!(s.can_transition_to(VenueOrderStatus::Submitted));
        assert!(s.can_transition_to(VenueOrderStatus::Failed));
        assert!(!s.can_transition_to(VenueOrderStatus::Filled));
    }

    #[test]
    fn test_submitted_transitions() {
        let s = VenueOrderStatus::Submitted;
        assert!(s.can_transition_to(VenueOrderStatus::Filled));
        assert!(s.can_transition_to(VenueOrderStatus::Cancelled));
        assert!(!s.can_transition_to(VenueOrderStatus::Pending));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [
            VenueOrderStatus::Filled,
            VenueOrderStatus::Cancelled,
            VenueOrderStatus::Failed,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                VenueOrderStatus::Pending,
                VenueOrderStatus::Submitted,
                VenueOrderStatus::Filled,
                VenueOrderStatus::Cancelled,
                VenueOrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
