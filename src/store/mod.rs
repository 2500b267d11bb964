//! Persistence layer.
//!
//! Services talk to a [`Store`] trait; `PgStore` backs it with Postgres and
//! `MemStore` keeps everything behind one mutex for tests. Multi-entity writes
//! that must be atomic are single trait methods so the Postgres implementation
//! can wrap one transaction around them.

mod memory;
mod pg;

pub use memory::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    BuyerGroupSession, GroupBuySession, GroupMember, LedgerEntry, Order, OrderStatus, Payment,
    ProductVariant, StockLevel,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("insufficient stock")]
    InsufficientStock,

    #[error("stock version conflict")]
    VersionConflict,

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("invalid stored value: {0}")]
    Invalid(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Movement reasons recorded in the inventory ledger.
pub mod reason {
    pub const SESSION_RESERVE: &str = "session_reserve";
    pub const SESSION_RELEASE: &str = "session_release";
    pub const ORDER_RESERVE: &str = "order_reserve";
    pub const ORDER_RELEASE: &str = "order_release";
    pub const SALE_COMMIT: &str = "sale_commit";
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- catalog ---

    /// Insert a variant together with its initial stock row.
    async fn insert_variant(&self, variant: &ProductVariant, stock: &StockLevel) -> Result<(), StoreError>;
    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>, StoreError>;
    async fn list_variants(&self) -> Result<Vec<ProductVariant>, StoreError>;

    // --- stock ---

    async fn stock(&self, variant_id: Uuid) -> Result<Option<StockLevel>, StoreError>;

    /// Atomically hold `qty` units; fails with `InsufficientStock` when
    /// `on_hand - reserved < qty`. Appends a ledger entry.
    async fn reserve_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError>;

    /// Return `qty` held units, clamped at zero. Appends a ledger entry.
    async fn release_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError>;

    /// Compare-and-swap sale deduction: drops `on_hand` and `reserved` by
    /// `qty` only if the stored version equals `expected_version`, bumping the
    /// version. Fails with `VersionConflict` on a stale version.
    async fn commit_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        expected_version: i64,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError>;

    async fn ledger_for(&self, variant_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    // --- group-buy sessions ---

    /// Reserve the session's committed quantity and insert the session, as one
    /// atomic unit.
    async fn create_session(&self, session: &GroupBuySession) -> Result<(), StoreError>;
    async fn session(&self, id: Uuid) -> Result<Option<GroupBuySession>, StoreError>;
    async fn sessions_for_seller(&self, seller_id: i64) -> Result<Vec<GroupBuySession>, StoreError>;
    async fn active_sessions(&self) -> Result<Vec<GroupBuySession>, StoreError>;
    async fn update_session(&self, session: &GroupBuySession) -> Result<(), StoreError>;

    /// Persist a finalized session and release `release_qty` reservation in
    /// the same transaction.
    async fn update_session_releasing_stock(
        &self,
        session: &GroupBuySession,
        release_qty: u32,
        ledger_reason: &str,
    ) -> Result<(), StoreError>;

    // --- buyer groups ---

    /// Insert a group with its organizer membership row.
    async fn create_buyer_group(
        &self,
        group: &BuyerGroupSession,
        organizer: &GroupMember,
    ) -> Result<(), StoreError>;
    async fn buyer_group(&self, id: Uuid) -> Result<Option<BuyerGroupSession>, StoreError>;
    /// Open buyer groups across all sessions, for deadline recovery at boot.
    async fn open_buyer_groups(&self) -> Result<Vec<BuyerGroupSession>, StoreError>;
    async fn buyer_group_by_code(&self, code: &str) -> Result<Option<BuyerGroupSession>, StoreError>;
    async fn open_group_for_organizer(&self, user_id: i64) -> Result<Option<BuyerGroupSession>, StoreError>;
    async fn group_members(&self, buyer_session_id: Uuid) -> Result<Vec<GroupMember>, StoreError>;

    /// Capacity-guarded membership insert: bumps `current_participants` and
    /// inserts the member only while the group is open and below
    /// `max_participants`. Returns false when the guard rejects the write.
    async fn add_member(
        &self,
        buyer_session_id: Uuid,
        member: &GroupMember,
        max_participants: u32,
    ) -> Result<bool, StoreError>;

    async fn update_buyer_group(&self, group: &BuyerGroupSession) -> Result<(), StoreError>;
    async fn update_member(&self, member: &GroupMember) -> Result<(), StoreError>;

    // --- orders & payments ---

    /// Reserve the order quantity and insert the order, as one atomic unit.
    /// Used by direct orders, which hold their own reservation.
    async fn create_order_reserving_stock(&self, order: &Order) -> Result<(), StoreError>;

    /// Plain order insert. Group orders draw on the session's reservation and
    /// must not reserve again.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError>;
    /// Orders still awaiting payment, for deadline recovery at boot.
    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError>;
    async fn orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), StoreError>;

    /// Persist an order status transition only if the stored status still is
    /// `from`. Returns false when another writer transitioned it first, which
    /// is how webhook replays and races stay single-effect.
    async fn transition_order(&self, order: &Order, from: OrderStatus) -> Result<bool, StoreError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;
    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError>;
}
