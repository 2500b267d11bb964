//! Group-Buy Session Aggregate
//!
//! A seller-created, time-boxed offer that holds a committed quantity of a
//! variant in reservation until the session finalizes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, GroupBuyEvent};

#[derive(Clone, Debug)]
pub struct GroupBuySession {
    id: Uuid,
    seller_id: i64,
    product_variant_id: Uuid,
    committed_quantity: u32,
    min_participants: u32,
    max_participants: u32,
    tiers: Vec<DiscountTier>,
    status: GroupBuyStatus,
    units_sold: u32,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

/// Discount unlocked once a buyer group reaches `min_participants` members.
/// Discounts are basis points so pricing stays in integer arithmetic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscountTier {
    pub min_participants: u32,
    pub discount_bps: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupBuyStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl GroupBuyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl GroupBuySession {
    pub fn open(
        seller_id: i64,
        product_variant_id: Uuid,
        committed_quantity: u32,
        min_participants: u32,
        max_participants: u32,
        mut tiers: Vec<DiscountTier>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, GroupBuyError> {
        if committed_quantity == 0 {
            return Err(GroupBuyError::EmptyCommitment);
        }
        if min_participants == 0 || max_participants < min_participants {
            return Err(GroupBuyError::InvalidParticipantBounds);
        }
        if expires_at <= Utc::now() {
            return Err(GroupBuyError::ExpiryInPast);
        }
        tiers.sort_by_key(|t| t.min_participants);
        let now = Utc::now();
        let id = Uuid::now_v7();
        let mut session = Self {
            id,
            seller_id,
            product_variant_id,
            committed_quantity,
            min_participants,
            max_participants,
            tiers,
            status: GroupBuyStatus::Active,
            units_sold: 0,
            expires_at,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        session.raise(DomainEvent::GroupBuy(GroupBuyEvent::SessionOpened {
            session_id: id,
            seller_id,
            variant_id: product_variant_id,
            committed: committed_quantity,
            expires_at,
        }));
        Ok(session)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        seller_id: i64,
        product_variant_id: Uuid,
        committed_quantity: u32,
        min_participants: u32,
        max_participants: u32,
        tiers: Vec<DiscountTier>,
        status: GroupBuyStatus,
        units_sold: u32,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id, seller_id, product_variant_id, committed_quantity, min_participants,
            max_participants, tiers, status, units_sold, expires_at, created_at, updated_at,
            events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn seller_id(&self) -> i64 { self.seller_id }
    pub fn product_variant_id(&self) -> Uuid { self.product_variant_id }
    pub fn committed_quantity(&self) -> u32 { self.committed_quantity }
    pub fn min_participants(&self) -> u32 { self.min_participants }
    pub fn max_participants(&self) -> u32 { self.max_participants }
    pub fn tiers(&self) -> &[DiscountTier] { &self.tiers }
    pub fn status(&self) -> GroupBuyStatus { self.status }
    pub fn units_sold(&self) -> u32 { self.units_sold }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_active(&self) -> bool { self.status == GroupBuyStatus::Active }

    /// Committed units not yet consumed by a paid order. This is the amount of
    /// reservation to return when the session finalizes.
    pub fn unsold(&self) -> u32 { self.committed_quantity - self.units_sold }

    /// Best discount for a group of `participants`, if any tier is reached.
    pub fn best_tier_for(&self, participants: u32) -> Option<&DiscountTier> {
        self.tiers
            .iter()
            .filter(|t| t.min_participants <= participants)
            .max_by_key(|t| t.min_participants)
    }

    /// Count a paid unit against the committed quantity.
    pub fn record_sale(&mut self, qty: u32) -> Result<(), GroupBuyError> {
        if !self.is_active() {
            return Err(GroupBuyError::AlreadyFinalized(self.status));
        }
        if qty > self.unsold() {
            return Err(GroupBuyError::Oversold);
        }
        self.units_sold += qty;
        self.touch();
        Ok(())
    }

    /// Finalize at expiry or explicit seller end. Returns the unsold quantity
    /// whose reservation must be released.
    pub fn complete(&mut self) -> Result<u32, GroupBuyError> {
        if !self.is_active() {
            return Err(GroupBuyError::AlreadyFinalized(self.status));
        }
        self.status = GroupBuyStatus::Completed;
        let released = self.unsold();
        self.touch();
        self.raise(DomainEvent::GroupBuy(GroupBuyEvent::SessionCompleted {
            session_id: self.id,
            units_sold: self.units_sold,
            released,
        }));
        Ok(released)
    }

    /// Seller cancellation. Returns the unsold quantity to release.
    pub fn cancel(&mut self) -> Result<u32, GroupBuyError> {
        if !self.is_active() {
            return Err(GroupBuyError::AlreadyFinalized(self.status));
        }
        self.status = GroupBuyStatus::Cancelled;
        let released = self.unsold();
        self.touch();
        self.raise(DomainEvent::GroupBuy(GroupBuyEvent::SessionCancelled {
            session_id: self.id,
            released,
        }));
        Ok(released)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBuyError {
    EmptyCommitment,
    InvalidParticipantBounds,
    ExpiryInPast,
    Oversold,
    AlreadyFinalized(GroupBuyStatus),
}
impl std::error::Error for GroupBuyError {}
impl std::fmt::Display for GroupBuyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCommitment => write!(f, "committed quantity must be positive"),
            Self::InvalidParticipantBounds => write!(f, "invalid participant bounds"),
            Self::ExpiryInPast => write!(f, "expiry must be in the future"),
            Self::Oversold => write!(f, "sale exceeds committed quantity"),
            Self::AlreadyFinalized(s) => write!(f, "session already {}", s.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> GroupBuySession {
        GroupBuySession::open(
            1,
            Uuid::now_v7(),
            20,
            2,
            10,
            vec![
                DiscountTier { min_participants: 5, discount_bps: 1000 },
                DiscountTier { min_participants: 2, discount_bps: 500 },
            ],
            Utc::now() + Duration::hours(4),
        )
        .unwrap()
    }

    #[test]
    fn finalization_happens_once() {
        let mut s = session();
        s.record_sale(3).unwrap();
        assert_eq!(s.complete().unwrap(), 17);
        assert_eq!(
            s.complete(),
            Err(GroupBuyError::AlreadyFinalized(GroupBuyStatus::Completed))
        );
        assert_eq!(
            s.cancel(),
            Err(GroupBuyError::AlreadyFinalized(GroupBuyStatus::Completed))
        );
    }

    #[test]
    fn sales_cannot_exceed_commitment() {
        let mut s = session();
        s.record_sale(20).unwrap();
        assert_eq!(s.record_sale(1), Err(GroupBuyError::Oversold));
        assert_eq!(s.unsold(), 0);
    }

    #[test]
    fn best_tier_picks_highest_reached() {
        let s = session();
        assert_eq!(s.best_tier_for(1), None);
        assert_eq!(s.best_tier_for(3).unwrap().discount_bps, 500);
        assert_eq!(s.best_tier_for(7).unwrap().discount_bps, 1000);
    }

    #[test]
    fn open_validates_bounds() {
        let expires = Utc::now() + Duration::hours(1);
        assert_eq!(
            GroupBuySession::open(1, Uuid::now_v7(), 0, 1, 2, vec![], expires).unwrap_err(),
            GroupBuyError::EmptyCommitment
        );
        assert_eq!(
            GroupBuySession::open(1, Uuid::now_v7(), 5, 3, 2, vec![], expires).unwrap_err(),
            GroupBuyError::InvalidParticipantBounds
        );
        assert_eq!(
            GroupBuySession::open(1, Uuid::now_v7(), 5, 1, 2, vec![], Utc::now() - Duration::minutes(1))
                .unwrap_err(),
            GroupBuyError::ExpiryInPast
        );
    }
}
