//! Deferred task payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work executed by the background workers at a wall-clock deadline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Finalize a group-buy session at its expiry.
    SessionEnd { session_id: Uuid },
    /// Expire a buyer group that never converted.
    BuyerSessionEnd { buyer_session_id: Uuid },
    /// Expire an order whose payment window lapsed.
    OrderExpiration { order_id: Uuid },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::SessionEnd { .. } => "groupbuy:session_end",
            Task::BuyerSessionEnd { .. } => "groupbuy:buyer_session_end",
            Task::OrderExpiration { .. } => "order:expire",
        }
    }
}
