//! In-memory store.
//!
//! Single mutex over plain maps; every composite write is atomic by
//! construction. Backs the test suites and local development without Postgres,
//! with the same CAS semantics as the Postgres store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::aggregates::{
    BuyerGroupSession, GroupBuySession, GroupMember, LedgerEntry, Order, OrderStatus, Payment,
    ProductVariant, StockError, StockLevel,
};

use super::{Store, StoreError};

#[derive(Default)]
struct MemState {
    variants: HashMap<Uuid, ProductVariant>,
    stocks: HashMap<Uuid, StockLevel>,
    ledger: Vec<LedgerEntry>,
    sessions: HashMap<Uuid, GroupBuySession>,
    groups: HashMap<Uuid, BuyerGroupSession>,
    members: HashMap<Uuid, Vec<GroupMember>>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
}

impl MemState {
    fn reserve(
        &mut self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let stock = self.stocks.get_mut(&variant_id).ok_or(StoreError::NotFound("stock"))?;
        stock.reserve(qty).map_err(map_stock_err)?;
        let snapshot = stock.clone();
        self.ledger.push(LedgerEntry::record(variant_id, 0, i64::from(qty), reason, order_id));
        Ok(snapshot)
    }

    fn release(
        &mut self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let stock = self.stocks.get_mut(&variant_id).ok_or(StoreError::NotFound("stock"))?;
        let before = stock.reserved();
        stock.release(qty);
        let released = i64::from(before - stock.reserved());
        let snapshot = stock.clone();
        self.ledger.push(LedgerEntry::record(variant_id, 0, -released, reason, order_id));
        Ok(snapshot)
    }
}

pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(MemState::default()) }
    }
}

impl Default for MemStore {
    fn default() -> Self { Self::new() }
}

fn map_stock_err(err: StockError) -> StoreError {
    match err {
        StockError::InsufficientStock => StoreError::InsufficientStock,
        StockError::VersionConflict => StoreError::VersionConflict,
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_variant(&self, variant: &ProductVariant, stock: &StockLevel) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.variants.values().any(|v| v.sku() == variant.sku()) {
            return Err(StoreError::Duplicate("sku"));
        }
        state.variants.insert(variant.id(), variant.clone());
        state.stocks.insert(variant.id(), stock.clone());
        Ok(())
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>, StoreError> {
        Ok(self.state.lock().await.variants.get(&id).cloned())
    }

    async fn list_variants(&self) -> Result<Vec<ProductVariant>, StoreError> {
        let state = self.state.lock().await;
        let mut variants: Vec<_> = state.variants.values().cloned().collect();
        variants.sort_by_key(|v| v.created_at());
        Ok(variants)
    }

    async fn stock(&self, variant_id: Uuid) -> Result<Option<StockLevel>, StoreError> {
        Ok(self.state.lock().await.stocks.get(&variant_id).cloned())
    }

    async fn reserve_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        self.state.lock().await.reserve(variant_id, qty, reason, order_id)
    }

    async fn release_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        self.state.lock().await.release(variant_id, qty, reason, order_id)
    }

    async fn commit_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        expected_version: i64,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let mut state = self.state.lock().await;
        let stock = state.stocks.get_mut(&variant_id).ok_or(StoreError::NotFound("stock"))?;
        stock.commit(qty, expected_version).map_err(map_stock_err)?;
        let snapshot = stock.clone();
        state.ledger.push(LedgerEntry::record(
            variant_id,
            -i64::from(qty),
            -i64::from(qty),
            super::reason::SALE_COMMIT,
            order_id,
        ));
        Ok(snapshot)
    }

    async fn ledger_for(&self, variant_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ledger.iter().filter(|e| e.variant_id == variant_id).cloned().collect())
    }

    async fn create_session(&self, session: &GroupBuySession) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.reserve(
            session.product_variant_id(),
            session.committed_quantity(),
            super::reason::SESSION_RESERVE,
            None,
        )?;
        state.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<GroupBuySession>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn sessions_for_seller(&self, seller_id: i64) -> Result<Vec<GroupBuySession>, StoreError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.seller_id() == seller_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }

    async fn active_sessions(&self) -> Result<Vec<GroupBuySession>, StoreError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<_> = state.sessions.values().filter(|s| s.is_active()).cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }

    async fn update_session(&self, session: &GroupBuySession) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&session.id()) {
            return Err(StoreError::NotFound("group-buy session"));
        }
        state.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn update_session_releasing_stock(
        &self,
        session: &GroupBuySession,
        release_qty: u32,
        ledger_reason: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&session.id()) {
            return Err(StoreError::NotFound("group-buy session"));
        }
        if release_qty > 0 {
            state.release(session.product_variant_id(), release_qty, ledger_reason, None)?;
        }
        state.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn create_buyer_group(
        &self,
        group: &BuyerGroupSession,
        organizer: &GroupMember,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.groups.insert(group.id(), group.clone());
        state.members.insert(group.id(), vec![organizer.clone()]);
        Ok(())
    }

    async fn buyer_group(&self, id: Uuid) -> Result<Option<BuyerGroupSession>, StoreError> {
        Ok(self.state.lock().await.groups.get(&id).cloned())
    }

    async fn open_buyer_groups(&self) -> Result<Vec<BuyerGroupSession>, StoreError> {
        let state = self.state.lock().await;
        let mut groups: Vec<_> = state.groups.values().filter(|g| g.is_open()).cloned().collect();
        groups.sort_by_key(|g| g.created_at());
        Ok(groups)
    }

    async fn buyer_group_by_code(&self, code: &str) -> Result<Option<BuyerGroupSession>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.groups.values().find(|g| g.code().as_str() == code).cloned())
    }

    async fn open_group_for_organizer(&self, user_id: i64) -> Result<Option<BuyerGroupSession>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .values()
            .find(|g| g.organizer_user_id() == user_id && g.is_open())
            .cloned())
    }

    async fn group_members(&self, buyer_session_id: Uuid) -> Result<Vec<GroupMember>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.members.get(&buyer_session_id).cloned().unwrap_or_default())
    }

    async fn add_member(
        &self,
        buyer_session_id: Uuid,
        member: &GroupMember,
        max_participants: u32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get(&buyer_session_id)
            .ok_or(StoreError::NotFound("buyer group"))?;
        if !group.is_open() || group.current_participants() >= max_participants {
            return Ok(false);
        }
        let updated = BuyerGroupSession::restore(
            group.id(),
            group.code().clone(),
            group.group_buy_session_id(),
            group.organizer_user_id(),
            group.title().to_string(),
            group.current_participants() + 1,
            group.status(),
            group.expires_at(),
            group.created_at(),
            Utc::now(),
        );
        state.groups.insert(buyer_session_id, updated);
        state.members.entry(buyer_session_id).or_default().push(member.clone());
        Ok(true)
    }

    async fn update_buyer_group(&self, group: &BuyerGroupSession) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.groups.contains_key(&group.id()) {
            return Err(StoreError::NotFound("buyer group"));
        }
        state.groups.insert(group.id(), group.clone());
        Ok(())
    }

    async fn update_member(&self, member: &GroupMember) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let members = state
            .members
            .get_mut(&member.buyer_session_id)
            .ok_or(StoreError::NotFound("buyer group"))?;
        let slot = members
            .iter_mut()
            .find(|m| m.id == member.id)
            .ok_or(StoreError::NotFound("group member"))?;
        *slot = member.clone();
        Ok(())
    }

    async fn create_order_reserving_stock(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.reserve(
            order.product_variant_id(),
            order.quantity(),
            super::reason::ORDER_RESERVE,
            Some(order.id()),
        )?;
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.order_number() == number).cloned())
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.is_pending_payment())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }

    async fn orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        let total = orders.len() as i64;
        let page = orders
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn transition_order(&self, order: &Order, from: OrderStatus) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.orders.get(&order.id()).ok_or(StoreError::NotFound("order"))?;
        if stored.status() != from {
            return Ok(false);
        }
        state.orders.insert(order.id(), order.clone());
        Ok(true)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.payments.insert(payment.order_id, payment.clone());
        Ok(())
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.lock().await.payments.get(&order_id).cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.payments.contains_key(&payment.order_id) {
            return Err(StoreError::NotFound("payment"));
        }
        state.payments.insert(payment.order_id, payment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Sku;

    async fn seeded() -> (MemStore, Uuid) {
        let store = MemStore::new();
        let variant = ProductVariant::create(1, Sku::new("SKU-1").unwrap(), "Widget", 10_000);
        let stock = StockLevel::new(variant.id(), 10);
        let id = variant.id();
        store.insert_variant(&variant, &stock).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn reserve_and_release_round_trip() {
        let (store, id) = seeded().await;
        let s = store.reserve_stock(id, 4, super::super::reason::ORDER_RESERVE, None).await.unwrap();
        assert_eq!(s.available(), 6);
        let s = store.release_stock(id, 4, super::super::reason::ORDER_RELEASE, None).await.unwrap();
        assert_eq!(s.available(), 10);
        assert_eq!(store.ledger_for(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn commit_conflicts_on_stale_version() {
        let (store, id) = seeded().await;
        store.reserve_stock(id, 2, super::super::reason::ORDER_RESERVE, None).await.unwrap();
        let stock = store.stock(id).await.unwrap().unwrap();
        store.commit_stock(id, 1, stock.version(), None).await.unwrap();
        let err = store.commit_stock(id, 1, stock.version(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn duplicate_sku_rejected() {
        let (store, _) = seeded().await;
        let dup = ProductVariant::create(2, Sku::new("SKU-1").unwrap(), "Other", 5_000);
        let stock = StockLevel::new(dup.id(), 1);
        let err = store.insert_variant(&dup, &stock).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("sku")));
    }
}
