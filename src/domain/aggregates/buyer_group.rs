//! Buyer Group Aggregate
//!
//! A buyer-organized sub-group that joins a group-buy session to reach
//! participation tiers. Membership is idempotent per user.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, GroupBuyEvent};
use crate::domain::value_objects::SessionCode;

#[derive(Clone, Debug)]
pub struct BuyerGroupSession {
    id: Uuid,
    code: SessionCode,
    group_buy_session_id: Uuid,
    organizer_user_id: i64,
    title: String,
    current_participants: u32,
    status: BuyerGroupStatus,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuyerGroupStatus {
    #[default]
    Open,
    Locked,
    Completed,
    Cancelled,
    Expired,
}

impl BuyerGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Locked => "locked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "locked" => Some(Self::Locked),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl BuyerGroupSession {
    /// Organize a group under `group_buy_session_id`. The organizer counts as
    /// the first participant.
    pub fn organize(
        group_buy_session_id: Uuid,
        organizer_user_id: i64,
        title: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::now_v7();
        let code = SessionCode::generate();
        let mut group = Self {
            id,
            code: code.clone(),
            group_buy_session_id,
            organizer_user_id,
            title: title.into(),
            current_participants: 1,
            status: BuyerGroupStatus::Open,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        group.raise(DomainEvent::GroupBuy(GroupBuyEvent::GroupOpened {
            buyer_session_id: id,
            session_id: group_buy_session_id,
            code: code.as_str().to_string(),
            organizer_id: organizer_user_id,
        }));
        group
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        code: SessionCode,
        group_buy_session_id: Uuid,
        organizer_user_id: i64,
        title: String,
        current_participants: u32,
        status: BuyerGroupStatus,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id, code, group_buy_session_id, organizer_user_id, title, current_participants,
            status, expires_at, created_at, updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn code(&self) -> &SessionCode { &self.code }
    pub fn group_buy_session_id(&self) -> Uuid { self.group_buy_session_id }
    pub fn organizer_user_id(&self) -> i64 { self.organizer_user_id }
    pub fn title(&self) -> &str { &self.title }
    pub fn current_participants(&self) -> u32 { self.current_participants }
    pub fn status(&self) -> BuyerGroupStatus { self.status }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_open(&self) -> bool { self.status == BuyerGroupStatus::Open }
    pub fn is_expired_by(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }

    /// Add one participant. `members` is the current membership; joining twice
    /// is a no-op. `max_participants` comes from the parent session.
    pub fn join(
        &mut self,
        user_id: i64,
        members: &[GroupMember],
        max_participants: u32,
    ) -> Result<JoinOutcome, BuyerGroupError> {
        if !self.is_open() {
            return Err(BuyerGroupError::NotOpen(self.status));
        }
        if members.iter().any(|m| m.user_id == user_id) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        if self.current_participants >= max_participants {
            return Err(BuyerGroupError::Full);
        }
        self.current_participants += 1;
        self.touch();
        self.raise(DomainEvent::GroupBuy(GroupBuyEvent::GroupJoined {
            buyer_session_id: self.id,
            user_id,
            participants: self.current_participants,
        }));
        Ok(JoinOutcome::Joined)
    }

    /// Expiry-task transition. Anything past Open has already left the state
    /// machine's reach and is reported as such.
    pub fn expire(&mut self) -> Result<(), BuyerGroupError> {
        if !self.is_open() {
            return Err(BuyerGroupError::NotOpen(self.status));
        }
        self.status = BuyerGroupStatus::Expired;
        self.touch();
        self.raise(DomainEvent::GroupBuy(GroupBuyEvent::GroupExpired {
            buyer_session_id: self.id,
        }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome { Joined, AlreadyMember }

/// One buyer inside a group.
#[derive(Clone, Debug)]
pub struct GroupMember {
    pub id: Uuid,
    pub buyer_session_id: Uuid,
    pub user_id: i64,
    pub order_id: Option<Uuid>,
    pub quantity: u32,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemberStatus {
    #[default]
    Joined,
    Paid,
    Cancelled,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "joined" => Some(Self::Joined),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl GroupMember {
    pub fn join(buyer_session_id: Uuid, user_id: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            buyer_session_id,
            user_id,
            order_id: None,
            quantity: 1,
            status: MemberStatus::Joined,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuyerGroupError {
    NotOpen(BuyerGroupStatus),
    Full,
}
impl std::error::Error for BuyerGroupError {}
impl std::fmt::Display for BuyerGroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen(s) => write!(f, "group is {}", s.as_str()),
            Self::Full => write!(f, "group is full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn group() -> BuyerGroupSession {
        BuyerGroupSession::organize(Uuid::now_v7(), 10, "office batch", Duration::hours(1))
    }

    #[test]
    fn join_is_idempotent() {
        let mut g = group();
        let members = vec![GroupMember::join(g.id(), 10)];
        assert_eq!(g.join(10, &members, 5).unwrap(), JoinOutcome::AlreadyMember);
        assert_eq!(g.current_participants(), 1);
        assert_eq!(g.join(11, &members, 5).unwrap(), JoinOutcome::Joined);
        assert_eq!(g.current_participants(), 2);
    }

    #[test]
    fn join_rejects_full_group() {
        let mut g = group();
        let members = vec![GroupMember::join(g.id(), 10)];
        assert_eq!(g.join(11, &members, 1), Err(BuyerGroupError::Full));
        assert_eq!(g.current_participants(), 1);
    }

    #[test]
    fn expire_only_from_open() {
        let mut g = group();
        g.expire().unwrap();
        assert_eq!(g.status(), BuyerGroupStatus::Expired);
        assert_eq!(g.expire(), Err(BuyerGroupError::NotOpen(BuyerGroupStatus::Expired)));
    }

    #[test]
    fn join_rejects_closed_group() {
        let mut g = group();
        g.expire().unwrap();
        assert_eq!(
            g.join(11, &[], 5),
            Err(BuyerGroupError::NotOpen(BuyerGroupStatus::Expired))
        );
    }
}
