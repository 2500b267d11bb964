//! Postgres store.
//!
//! Runtime-bound sqlx queries; composite writes run inside one transaction.
//! Stock mutations lock the stock row (`FOR UPDATE`) and apply the domain
//! arithmetic, except the sale commit which is a single compare-and-swap
//! UPDATE on the version column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::aggregates::{
    BuyerGroupSession, BuyerGroupStatus, DiscountTier, GroupBuySession, GroupBuyStatus,
    GroupMember, LedgerEntry, MemberStatus, Order, OrderStatus, Payment, PaymentStatus,
    ProductVariant, StockLevel,
};
use crate::domain::value_objects::{SessionCode, Sku};

use super::{Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// --- row mappers ---

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: Uuid,
    seller_id: i64,
    sku: String,
    name: String,
    price: i64,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VariantRow {
    fn into_domain(self) -> Result<ProductVariant, StoreError> {
        let sku = Sku::new(self.sku).map_err(|_| StoreError::Invalid("sku"))?;
        Ok(ProductVariant::restore(
            self.id, self.seller_id, sku, self.name, self.price, self.active,
            self.created_at, self.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct StockRow {
    variant_id: Uuid,
    on_hand: i32,
    reserved: i32,
    low_stock_threshold: i32,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl StockRow {
    fn into_domain(self) -> StockLevel {
        StockLevel::restore(
            self.variant_id,
            self.on_hand.max(0) as u32,
            self.reserved.max(0) as u32,
            self.low_stock_threshold.max(0) as u32,
            self.version,
            self.updated_at,
        )
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    seller_id: i64,
    product_variant_id: Uuid,
    committed_quantity: i32,
    min_participants: i32,
    max_participants: i32,
    status: String,
    units_sold: i32,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_domain(self, tiers: Vec<DiscountTier>) -> Result<GroupBuySession, StoreError> {
        let status = GroupBuyStatus::parse(&self.status).ok_or(StoreError::Invalid("session status"))?;
        Ok(GroupBuySession::restore(
            self.id,
            self.seller_id,
            self.product_variant_id,
            self.committed_quantity.max(0) as u32,
            self.min_participants.max(0) as u32,
            self.max_participants.max(0) as u32,
            tiers,
            status,
            self.units_sold.max(0) as u32,
            self.expires_at,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct TierRow {
    min_participants: i32,
    discount_bps: i32,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    code: String,
    group_buy_session_id: Uuid,
    organizer_user_id: i64,
    title: String,
    current_participants: i32,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GroupRow {
    fn into_domain(self) -> Result<BuyerGroupSession, StoreError> {
        let status = BuyerGroupStatus::parse(&self.status).ok_or(StoreError::Invalid("group status"))?;
        let code = SessionCode::parse(self.code).map_err(|_| StoreError::Invalid("group code"))?;
        Ok(BuyerGroupSession::restore(
            self.id,
            code,
            self.group_buy_session_id,
            self.organizer_user_id,
            self.title,
            self.current_participants.max(0) as u32,
            status,
            self.expires_at,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    buyer_session_id: Uuid,
    user_id: i64,
    order_id: Option<Uuid>,
    quantity: i32,
    status: String,
    joined_at: DateTime<Utc>,
}

impl MemberRow {
    fn into_domain(self) -> Result<GroupMember, StoreError> {
        let status = MemberStatus::parse(&self.status).ok_or(StoreError::Invalid("member status"))?;
        Ok(GroupMember {
            id: self.id,
            buyer_session_id: self.buyer_session_id,
            user_id: self.user_id,
            order_id: self.order_id,
            quantity: self.quantity.max(0) as u32,
            status,
            joined_at: self.joined_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: i64,
    seller_id: i64,
    product_variant_id: Uuid,
    buyer_group_session_id: Option<Uuid>,
    quantity: i32,
    unit_price: i64,
    discount_bps: i32,
    subtotal: i64,
    delivery_charge: i64,
    total_amount: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> Result<Order, StoreError> {
        let status = OrderStatus::parse(&self.status).ok_or(StoreError::Invalid("order status"))?;
        Ok(Order::restore(
            self.id,
            self.order_number,
            self.user_id,
            self.seller_id,
            self.product_variant_id,
            self.buyer_group_session_id,
            self.quantity.max(0) as u32,
            self.unit_price,
            self.discount_bps.max(0) as u32,
            self.subtotal,
            self.delivery_charge,
            self.total_amount,
            status,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    amount: i64,
    status: String,
    method: String,
    bank_code: String,
    va_number: Option<String>,
    bill_key: Option<String>,
    biller_code: Option<String>,
    gateway_transaction_id: Option<String>,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(self) -> Result<Payment, StoreError> {
        let status = PaymentStatus::parse(&self.status).ok_or(StoreError::Invalid("payment status"))?;
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            amount: self.amount,
            status,
            method: self.method,
            bank_code: self.bank_code,
            va_number: self.va_number,
            bill_key: self.bill_key,
            biller_code: self.biller_code,
            gateway_transaction_id: self.gateway_transaction_id,
            expires_at: self.expires_at,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// --- in-transaction helpers ---

async fn lock_stock(conn: &mut PgConnection, variant_id: Uuid) -> Result<StockLevel, StoreError> {
    let row = sqlx::query_as::<_, StockRow>(
        "SELECT variant_id, on_hand, reserved, low_stock_threshold, version, updated_at \
         FROM product_variant_stocks WHERE variant_id = $1 FOR UPDATE",
    )
    .bind(variant_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound("stock"))?;
    Ok(row.into_domain())
}

async fn save_stock(conn: &mut PgConnection, stock: &StockLevel) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE product_variant_stocks \
         SET on_hand = $2, reserved = $3, version = $4, updated_at = $5 \
         WHERE variant_id = $1",
    )
    .bind(stock.variant_id())
    .bind(stock.on_hand() as i32)
    .bind(stock.reserved() as i32)
    .bind(stock.version())
    .bind(stock.updated_at())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_ledger(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO inventory_ledger (id, variant_id, on_hand_delta, reserved_delta, reason, order_id, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(entry.variant_id)
    .bind(entry.on_hand_delta)
    .bind(entry.reserved_delta)
    .bind(&entry.reason)
    .bind(entry.order_id)
    .bind(entry.recorded_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn reserve_in_tx(
    conn: &mut PgConnection,
    variant_id: Uuid,
    qty: u32,
    reason: &str,
    order_id: Option<Uuid>,
) -> Result<StockLevel, StoreError> {
    let mut stock = lock_stock(conn, variant_id).await?;
    stock.reserve(qty).map_err(|_| StoreError::InsufficientStock)?;
    save_stock(conn, &stock).await?;
    insert_ledger(
        conn,
        &LedgerEntry::record(variant_id, 0, i64::from(qty), reason, order_id),
    )
    .await?;
    Ok(stock)
}

async fn release_in_tx(
    conn: &mut PgConnection,
    variant_id: Uuid,
    qty: u32,
    reason: &str,
    order_id: Option<Uuid>,
) -> Result<StockLevel, StoreError> {
    let mut stock = lock_stock(conn, variant_id).await?;
    let before = stock.reserved();
    stock.release(qty);
    let released = i64::from(before - stock.reserved());
    save_stock(conn, &stock).await?;
    insert_ledger(
        conn,
        &LedgerEntry::record(variant_id, 0, -released, reason, order_id),
    )
    .await?;
    Ok(stock)
}

impl PgStore {
    async fn session_tiers(&self, session_id: Uuid) -> Result<Vec<DiscountTier>, StoreError> {
        let rows = sqlx::query_as::<_, TierRow>(
            "SELECT min_participants, discount_bps FROM group_buy_tiers \
             WHERE session_id = $1 ORDER BY min_participants",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|t| DiscountTier {
                min_participants: t.min_participants.max(0) as u32,
                discount_bps: t.discount_bps.max(0) as u32,
            })
            .collect())
    }

    async fn hydrate_sessions(&self, rows: Vec<SessionRow>) -> Result<Vec<GroupBuySession>, StoreError> {
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let tiers = self.session_tiers(row.id).await?;
            sessions.push(row.into_domain(tiers)?);
        }
        Ok(sessions)
    }
}

const SESSION_COLUMNS: &str = "id, seller_id, product_variant_id, committed_quantity, \
     min_participants, max_participants, status, units_sold, expires_at, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, user_id, seller_id, product_variant_id, \
     buyer_group_session_id, quantity, unit_price, discount_bps, subtotal, delivery_charge, \
     total_amount, status, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn insert_variant(&self, variant: &ProductVariant, stock: &StockLevel) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO product_variants (id, seller_id, sku, name, price, active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (sku) DO NOTHING",
        )
        .bind(variant.id())
        .bind(variant.seller_id())
        .bind(variant.sku().as_str())
        .bind(variant.name())
        .bind(variant.price())
        .bind(variant.is_active())
        .bind(variant.created_at())
        .bind(variant.updated_at())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate("sku"));
        }
        sqlx::query(
            "INSERT INTO product_variant_stocks (variant_id, on_hand, reserved, low_stock_threshold, version, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(stock.variant_id())
        .bind(stock.on_hand() as i32)
        .bind(stock.reserved() as i32)
        .bind(stock.low_stock_threshold() as i32)
        .bind(stock.version())
        .bind(stock.updated_at())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>, StoreError> {
        sqlx::query_as::<_, VariantRow>("SELECT * FROM product_variants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(VariantRow::into_domain)
            .transpose()
    }

    async fn list_variants(&self) -> Result<Vec<ProductVariant>, StoreError> {
        let rows = sqlx::query_as::<_, VariantRow>(
            "SELECT * FROM product_variants WHERE active ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VariantRow::into_domain).collect()
    }

    async fn stock(&self, variant_id: Uuid) -> Result<Option<StockLevel>, StoreError> {
        let row = sqlx::query_as::<_, StockRow>(
            "SELECT variant_id, on_hand, reserved, low_stock_threshold, version, updated_at \
             FROM product_variant_stocks WHERE variant_id = $1",
        )
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StockRow::into_domain))
    }

    async fn reserve_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let mut tx = self.pool.begin().await?;
        let stock = reserve_in_tx(&mut tx, variant_id, qty, reason, order_id).await?;
        tx.commit().await?;
        Ok(stock)
    }

    async fn release_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let mut tx = self.pool.begin().await?;
        let stock = release_in_tx(&mut tx, variant_id, qty, reason, order_id).await?;
        tx.commit().await?;
        Ok(stock)
    }

    async fn commit_stock(
        &self,
        variant_id: Uuid,
        qty: u32,
        expected_version: i64,
        order_id: Option<Uuid>,
    ) -> Result<StockLevel, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, StockRow>(
            "UPDATE product_variant_stocks \
             SET on_hand = on_hand - $2, reserved = reserved - $2, version = version + 1, updated_at = NOW() \
             WHERE variant_id = $1 AND version = $3 AND on_hand >= $2 AND reserved >= $2 \
             RETURNING variant_id, on_hand, reserved, low_stock_threshold, version, updated_at",
        )
        .bind(variant_id)
        .bind(qty as i32)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            // Lost the swap; figure out which guard failed.
            let current = sqlx::query_as::<_, StockRow>(
                "SELECT variant_id, on_hand, reserved, low_stock_threshold, version, updated_at \
                 FROM product_variant_stocks WHERE variant_id = $1",
            )
            .bind(variant_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("stock"))?;
            return if current.version != expected_version {
                Err(StoreError::VersionConflict)
            } else {
                Err(StoreError::InsufficientStock)
            };
        };

        insert_ledger(
            &mut tx,
            &LedgerEntry::record(
                variant_id,
                -i64::from(qty),
                -i64::from(qty),
                super::reason::SALE_COMMIT,
                order_id,
            ),
        )
        .await?;
        tx.commit().await?;
        Ok(row.into_domain())
    }

    async fn ledger_for(&self, variant_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: Uuid,
            variant_id: Uuid,
            on_hand_delta: i64,
            reserved_delta: i64,
            reason: String,
            order_id: Option<Uuid>,
            recorded_at: DateTime<Utc>,
        }
        let rows = sqlx::query_as::<_, Row>(
            "SELECT * FROM inventory_ledger WHERE variant_id = $1 ORDER BY recorded_at",
        )
        .bind(variant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LedgerEntry {
                id: r.id,
                variant_id: r.variant_id,
                on_hand_delta: r.on_hand_delta,
                reserved_delta: r.reserved_delta,
                reason: r.reason,
                order_id: r.order_id,
                recorded_at: r.recorded_at,
            })
            .collect())
    }

    async fn create_session(&self, session: &GroupBuySession) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        reserve_in_tx(
            &mut tx,
            session.product_variant_id(),
            session.committed_quantity(),
            super::reason::SESSION_RESERVE,
            None,
        )
        .await?;
        sqlx::query(
            "INSERT INTO group_buy_sessions (id, seller_id, product_variant_id, committed_quantity, \
             min_participants, max_participants, status, units_sold, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id())
        .bind(session.seller_id())
        .bind(session.product_variant_id())
        .bind(session.committed_quantity() as i32)
        .bind(session.min_participants() as i32)
        .bind(session.max_participants() as i32)
        .bind(session.status().as_str())
        .bind(session.units_sold() as i32)
        .bind(session.expires_at())
        .bind(session.created_at())
        .bind(session.updated_at())
        .execute(&mut *tx)
        .await?;
        for tier in session.tiers() {
            sqlx::query(
                "INSERT INTO group_buy_tiers (id, session_id, min_participants, discount_bps) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::now_v7())
            .bind(session.id())
            .bind(tier.min_participants as i32)
            .bind(tier.discount_bps as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<GroupBuySession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM group_buy_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let tiers = self.session_tiers(row.id).await?;
                Ok(Some(row.into_domain(tiers)?))
            }
            None => Ok(None),
        }
    }

    async fn sessions_for_seller(&self, seller_id: i64) -> Result<Vec<GroupBuySession>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM group_buy_sessions WHERE seller_id = $1 ORDER BY created_at"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_sessions(rows).await
    }

    async fn active_sessions(&self) -> Result<Vec<GroupBuySession>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM group_buy_sessions WHERE status = 'active' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_sessions(rows).await
    }

    async fn update_session(&self, session: &GroupBuySession) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE group_buy_sessions SET status = $2, units_sold = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(session.id())
        .bind(session.status().as_str())
        .bind(session.units_sold() as i32)
        .bind(session.updated_at())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("group-buy session"));
        }
        Ok(())
    }

    async fn update_session_releasing_stock(
        &self,
        session: &GroupBuySession,
        release_qty: u32,
        ledger_reason: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE group_buy_sessions SET status = $2, units_sold = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(session.id())
        .bind(session.status().as_str())
        .bind(session.units_sold() as i32)
        .bind(session.updated_at())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("group-buy session"));
        }
        if release_qty > 0 {
            release_in_tx(&mut tx, session.product_variant_id(), release_qty, ledger_reason, None).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_buyer_group(
        &self,
        group: &BuyerGroupSession,
        organizer: &GroupMember,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO buyer_group_sessions (id, code, group_buy_session_id, organizer_user_id, \
             title, current_participants, status, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(group.id())
        .bind(group.code().as_str())
        .bind(group.group_buy_session_id())
        .bind(group.organizer_user_id())
        .bind(group.title())
        .bind(group.current_participants() as i32)
        .bind(group.status().as_str())
        .bind(group.expires_at())
        .bind(group.created_at())
        .bind(group.updated_at())
        .execute(&mut *tx)
        .await?;
        insert_member(&mut tx, organizer).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn buyer_group(&self, id: Uuid) -> Result<Option<BuyerGroupSession>, StoreError> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM buyer_group_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(GroupRow::into_domain)
            .transpose()
    }

    async fn open_buyer_groups(&self) -> Result<Vec<BuyerGroupSession>, StoreError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT * FROM buyer_group_sessions WHERE status = 'open' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(GroupRow::into_domain).collect()
    }

    async fn buyer_group_by_code(&self, code: &str) -> Result<Option<BuyerGroupSession>, StoreError> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM buyer_group_sessions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(GroupRow::into_domain)
            .transpose()
    }

    async fn open_group_for_organizer(&self, user_id: i64) -> Result<Option<BuyerGroupSession>, StoreError> {
        sqlx::query_as::<_, GroupRow>(
            "SELECT * FROM buyer_group_sessions WHERE organizer_user_id = $1 AND status = 'open' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(GroupRow::into_domain)
        .transpose()
    }

    async fn group_members(&self, buyer_session_id: Uuid) -> Result<Vec<GroupMember>, StoreError> {
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM buyer_group_members WHERE buyer_session_id = $1 ORDER BY joined_at",
        )
        .bind(buyer_session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MemberRow::into_domain).collect()
    }

    async fn add_member(
        &self,
        buyer_session_id: Uuid,
        member: &GroupMember,
        max_participants: u32,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        // The capacity guard and the increment are one statement, so two
        // concurrent joins cannot both observe the same count.
        let result = sqlx::query(
            "UPDATE buyer_group_sessions \
             SET current_participants = current_participants + 1, updated_at = NOW() \
             WHERE id = $1 AND status = 'open' AND current_participants < $2",
        )
        .bind(buyer_session_id)
        .bind(max_participants as i32)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        insert_member(&mut tx, member).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_buyer_group(&self, group: &BuyerGroupSession) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE buyer_group_sessions \
             SET current_participants = $2, status = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(group.id())
        .bind(group.current_participants() as i32)
        .bind(group.status().as_str())
        .bind(group.updated_at())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("buyer group"));
        }
        Ok(())
    }

    async fn update_member(&self, member: &GroupMember) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE buyer_group_members SET order_id = $2, quantity = $3, status = $4 WHERE id = $1",
        )
        .bind(member.id)
        .bind(member.order_id)
        .bind(member.quantity as i32)
        .bind(member.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("group member"));
        }
        Ok(())
    }

    async fn create_order_reserving_stock(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        reserve_in_tx(
            &mut tx,
            order.product_variant_id(),
            order.quantity(),
            super::reason::ORDER_RESERVE,
            Some(order.id()),
        )
        .await?;
        insert_order_row(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OrderRow::into_domain)
            .transpose()
    }

    async fn order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .map(OrderRow::into_domain)
        .transpose()
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending_payment' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    async fn orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let orders = rows
            .into_iter()
            .map(OrderRow::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((orders, total.0))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_order_row(&mut conn, order).await
    }

    async fn transition_order(&self, order: &Order, from: OrderStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1 AND status = $4",
        )
        .bind(order.id())
        .bind(order.status().as_str())
        .bind(order.updated_at())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = $1")
                .bind(order.id())
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound("order"));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, amount, status, method, bank_code, va_number, \
             bill_key, biller_code, gateway_transaction_id, expires_at, paid_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(&payment.method)
        .bind(&payment.bank_code)
        .bind(&payment.va_number)
        .bind(&payment.bill_key)
        .bind(&payment.biller_code)
        .bind(&payment.gateway_transaction_id)
        .bind(payment.expires_at)
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentRow::into_domain)
            .transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE payments SET status = $2, va_number = $3, bill_key = $4, biller_code = $5, \
             gateway_transaction_id = $6, paid_at = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.va_number)
        .bind(&payment.bill_key)
        .bind(&payment.biller_code)
        .bind(&payment.gateway_transaction_id)
        .bind(payment.paid_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("payment"));
        }
        Ok(())
    }
}

async fn insert_order_row(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO orders (id, order_number, user_id, seller_id, product_variant_id, \
         buyer_group_session_id, quantity, unit_price, discount_bps, subtotal, delivery_charge, \
         total_amount, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(order.id())
    .bind(order.order_number())
    .bind(order.user_id())
    .bind(order.seller_id())
    .bind(order.product_variant_id())
    .bind(order.buyer_group_session_id())
    .bind(order.quantity() as i32)
    .bind(order.unit_price())
    .bind(order.discount_bps() as i32)
    .bind(order.subtotal())
    .bind(order.delivery_charge())
    .bind(order.total_amount())
    .bind(order.status().as_str())
    .bind(order.created_at())
    .bind(order.updated_at())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_member(conn: &mut PgConnection, member: &GroupMember) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO buyer_group_members (id, buyer_session_id, user_id, order_id, quantity, status, joined_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(member.id)
    .bind(member.buyer_session_id)
    .bind(member.user_id)
    .bind(member.order_id)
    .bind(member.quantity as i32)
    .bind(member.status.as_str())
    .bind(member.joined_at)
    .execute(conn)
    .await?;
    Ok(())
}
