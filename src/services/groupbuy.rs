//! Group-buy session lifecycle.
//!
//! Opening a session reserves its committed quantity and schedules the
//! expiry task; finalization is idempotent so the task and an explicit seller
//! end can race without double effects.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{
    BuyerGroupError, BuyerGroupSession, DiscountTier, GroupBuyError, GroupBuySession,
    GroupMember, JoinOutcome,
};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::SessionCode;
use crate::error::{AppError, AppResult};
use crate::scheduler::{Scheduler, Task};
use crate::store::{reason, Store};

use super::events::EventPublisher;

#[derive(Clone)]
pub struct GroupBuyService {
    store: Arc<dyn Store>,
    scheduler: Scheduler,
    events: EventPublisher,
    group_ttl: Duration,
}

pub struct OpenSessionInput {
    pub seller_id: i64,
    pub product_variant_id: Uuid,
    pub committed_quantity: u32,
    pub min_participants: u32,
    pub max_participants: u32,
    pub tiers: Vec<DiscountTier>,
    pub expires_at: DateTime<Utc>,
}

/// What a finalization attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndOutcome {
    Completed { released: u32 },
    AlreadySettled,
}

impl GroupBuyService {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Scheduler,
        events: EventPublisher,
        group_ttl: Duration,
    ) -> Self {
        Self { store, scheduler, events, group_ttl }
    }

    pub async fn open_session(&self, input: OpenSessionInput) -> AppResult<GroupBuySession> {
        let variant = self
            .store
            .variant(input.product_variant_id)
            .await?
            .ok_or(AppError::NotFound("product variant"))?;
        if !variant.is_active() {
            return Err(AppError::BadRequest("variant is not active".into()));
        }

        let mut session = GroupBuySession::open(
            input.seller_id,
            input.product_variant_id,
            input.committed_quantity,
            input.min_participants,
            input.max_participants,
            input.tiers,
            input.expires_at,
        )
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

        // Reserves the committed quantity in the same transaction; an
        // insufficient pool fails the whole operation.
        self.store.create_session(&session).await?;

        self.scheduler
            .schedule_at(Task::SessionEnd { session_id: session.id() }, session.expires_at())
            .await;

        tracing::info!(
            session_id = %session.id(),
            seller_id = session.seller_id(),
            variant_id = %session.product_variant_id(),
            committed = session.committed_quantity(),
            expires_at = %session.expires_at(),
            "group-buy session opened"
        );
        self.events
            .publish(&DomainEvent::Stock(StockEvent::Reserved {
                variant_id: session.product_variant_id(),
                quantity: session.committed_quantity(),
            }))
            .await;
        self.events.publish_all(session.take_events()).await;
        Ok(session)
    }

    pub async fn session(&self, id: Uuid) -> AppResult<GroupBuySession> {
        self.store
            .session(id)
            .await?
            .ok_or(AppError::NotFound("group-buy session"))
    }

    pub async fn sessions_for_seller(&self, seller_id: i64) -> AppResult<Vec<GroupBuySession>> {
        Ok(self.store.sessions_for_seller(seller_id).await?)
    }

    pub async fn open_sessions(&self) -> AppResult<Vec<GroupBuySession>> {
        Ok(self.store.active_sessions().await?)
    }

    /// Idempotent finalize, shared by the expiry task and the seller path.
    pub async fn end_session(&self, session_id: Uuid) -> AppResult<EndOutcome> {
        let mut session = self
            .store
            .session(session_id)
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;

        let released = match session.complete() {
            Ok(released) => released,
            Err(GroupBuyError::AlreadyFinalized(status)) => {
                tracing::debug!(%session_id, status = status.as_str(), "session already finalized, skipping");
                return Ok(EndOutcome::AlreadySettled);
            }
            Err(err) => return Err(AppError::BadRequest(err.to_string())),
        };

        self.store
            .update_session_releasing_stock(&session, released, reason::SESSION_RELEASE)
            .await?;

        tracing::info!(
            %session_id,
            units_sold = session.units_sold(),
            released,
            "group-buy session completed"
        );
        if released > 0 {
            self.events
                .publish(&DomainEvent::Stock(StockEvent::Released {
                    variant_id: session.product_variant_id(),
                    quantity: released,
                }))
                .await;
        }
        self.events.publish_all(session.take_events()).await;
        Ok(EndOutcome::Completed { released })
    }

    /// Explicit seller end; ownership is enforced and a finalized session is a
    /// client-visible conflict rather than a silent skip.
    pub async fn end_session_for_seller(&self, session_id: Uuid, seller_id: i64) -> AppResult<()> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        if session.seller_id() != seller_id {
            return Err(AppError::Forbidden("session belongs to another seller"));
        }
        match self.end_session(session_id).await? {
            EndOutcome::Completed { .. } => Ok(()),
            EndOutcome::AlreadySettled => Err(AppError::SessionClosed),
        }
    }

    pub async fn cancel_session(&self, session_id: Uuid, seller_id: i64) -> AppResult<()> {
        let mut session = self
            .store
            .session(session_id)
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        if session.seller_id() != seller_id {
            return Err(AppError::Forbidden("session belongs to another seller"));
        }

        let released = match session.cancel() {
            Ok(released) => released,
            Err(GroupBuyError::AlreadyFinalized(_)) => return Err(AppError::SessionClosed),
            Err(err) => return Err(AppError::BadRequest(err.to_string())),
        };

        self.store
            .update_session_releasing_stock(&session, released, reason::SESSION_RELEASE)
            .await?;

        tracing::info!(%session_id, released, "group-buy session cancelled");
        if released > 0 {
            self.events
                .publish(&DomainEvent::Stock(StockEvent::Released {
                    variant_id: session.product_variant_id(),
                    quantity: released,
                }))
                .await;
        }
        self.events.publish_all(session.take_events()).await;
        Ok(())
    }

    pub async fn organize_group(
        &self,
        group_buy_session_id: Uuid,
        organizer_user_id: i64,
        title: &str,
    ) -> AppResult<BuyerGroupSession> {
        if self
            .store
            .open_group_for_organizer(organizer_user_id)
            .await?
            .is_some()
        {
            return Err(AppError::GroupAlreadyOrganized);
        }

        let session = self
            .store
            .session(group_buy_session_id)
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        if !session.is_active() || session.expires_at() <= Utc::now() {
            return Err(AppError::SessionClosed);
        }

        // The group can never outlive its parent session.
        let ttl = self.group_ttl.min(session.expires_at() - Utc::now());
        let mut group =
            BuyerGroupSession::organize(group_buy_session_id, organizer_user_id, title, ttl);
        let organizer = GroupMember::join(group.id(), organizer_user_id);
        self.store.create_buyer_group(&group, &organizer).await?;

        self.scheduler
            .schedule_at(
                Task::BuyerSessionEnd { buyer_session_id: group.id() },
                group.expires_at(),
            )
            .await;

        tracing::info!(
            buyer_session_id = %group.id(),
            code = group.code().as_str(),
            organizer = organizer_user_id,
            "buyer group organized"
        );
        self.events.publish_all(group.take_events()).await;
        Ok(group)
    }

    pub async fn group_by_code(
        &self,
        code: &str,
    ) -> AppResult<(BuyerGroupSession, GroupBuySession, Vec<GroupMember>)> {
        let code = SessionCode::parse(code).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let group = self
            .store
            .buyer_group_by_code(code.as_str())
            .await?
            .ok_or(AppError::NotFound("buyer group"))?;
        let session = self
            .store
            .session(group.group_buy_session_id())
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        let members = self.store.group_members(group.id()).await?;
        Ok((group, session, members))
    }

    pub async fn join_group(&self, code: &str, user_id: i64) -> AppResult<JoinOutcome> {
        let code = SessionCode::parse(code).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let mut group = self
            .store
            .buyer_group_by_code(code.as_str())
            .await?
            .ok_or(AppError::NotFound("buyer group"))?;
        let session = self
            .store
            .session(group.group_buy_session_id())
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        if !session.is_active() {
            return Err(AppError::SessionClosed);
        }

        let members = self.store.group_members(group.id()).await?;
        match group.join(user_id, &members, session.max_participants()) {
            Ok(JoinOutcome::AlreadyMember) => return Ok(JoinOutcome::AlreadyMember),
            Ok(JoinOutcome::Joined) => {}
            Err(BuyerGroupError::Full) => return Err(AppError::GroupFull),
            Err(BuyerGroupError::NotOpen(_)) => return Err(AppError::SessionClosed),
        }

        // The store re-checks capacity inside the write, so two concurrent
        // joins cannot both take the last slot.
        let member = GroupMember::join(group.id(), user_id);
        let inserted = self
            .store
            .add_member(group.id(), &member, session.max_participants())
            .await?;
        if !inserted {
            return Err(AppError::GroupFull);
        }

        tracing::info!(
            buyer_session_id = %group.id(),
            user_id,
            participants = group.current_participants(),
            "buyer joined group"
        );
        self.events.publish_all(group.take_events()).await;
        Ok(JoinOutcome::Joined)
    }

    /// Expiry-task transition for buyer groups; replays are skips.
    pub async fn expire_group(&self, buyer_session_id: Uuid) -> AppResult<()> {
        let mut group = self
            .store
            .buyer_group(buyer_session_id)
            .await?
            .ok_or(AppError::NotFound("buyer group"))?;
        match group.expire() {
            Ok(()) => {
                self.store.update_buyer_group(&group).await?;
                tracing::info!(%buyer_session_id, "buyer group expired");
                self.events.publish_all(group.take_events()).await;
                Ok(())
            }
            Err(BuyerGroupError::NotOpen(status)) => {
                tracing::debug!(
                    %buyer_session_id,
                    status = status.as_str(),
                    "buyer group already closed, skipping"
                );
                Ok(())
            }
            Err(err) => Err(AppError::BadRequest(err.to_string())),
        }
    }
}
