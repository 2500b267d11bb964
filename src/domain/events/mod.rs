//! Domain events
//!
//! Serializable so they can be published to NATS subjects as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    GroupBuy(GroupBuyEvent),
    Order(OrderEvent),
    Stock(StockEvent),
}

impl DomainEvent {
    /// NATS subject this event is published under.
    pub fn subject(&self) -> &'static str {
        match self {
            DomainEvent::GroupBuy(e) => e.subject(),
            DomainEvent::Order(e) => e.subject(),
            DomainEvent::Stock(e) => e.subject(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupBuyEvent {
    SessionOpened { session_id: Uuid, seller_id: i64, variant_id: Uuid, committed: u32, expires_at: DateTime<Utc> },
    SessionCompleted { session_id: Uuid, units_sold: u32, released: u32 },
    SessionCancelled { session_id: Uuid, released: u32 },
    GroupOpened { buyer_session_id: Uuid, session_id: Uuid, code: String, organizer_id: i64 },
    GroupJoined { buyer_session_id: Uuid, user_id: i64, participants: u32 },
    GroupExpired { buyer_session_id: Uuid },
}

impl GroupBuyEvent {
    fn subject(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "groupbuy.session.opened",
            Self::SessionCompleted { .. } => "groupbuy.session.completed",
            Self::SessionCancelled { .. } => "groupbuy.session.cancelled",
            Self::GroupOpened { .. } => "groupbuy.group.opened",
            Self::GroupJoined { .. } => "groupbuy.group.joined",
            Self::GroupExpired { .. } => "groupbuy.group.expired",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, user_id: i64, total: i64 },
    Paid { order_id: Uuid, order_number: String },
    Expired { order_id: Uuid, order_number: String },
    Cancelled { order_id: Uuid, order_number: String },
}

impl OrderEvent {
    fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "orders.created",
            Self::Paid { .. } => "orders.paid",
            Self::Expired { .. } => "orders.expired",
            Self::Cancelled { .. } => "orders.cancelled",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StockEvent {
    Reserved { variant_id: Uuid, quantity: u32 },
    Released { variant_id: Uuid, quantity: u32 },
    Committed { variant_id: Uuid, quantity: u32 },
    LowStock { variant_id: Uuid, available: u32, threshold: u32 },
}

impl StockEvent {
    fn subject(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => "stock.reserved",
            Self::Released { .. } => "stock.released",
            Self::Committed { .. } => "stock.committed",
            Self::LowStock { .. } => "stock.low",
        }
    }
}
