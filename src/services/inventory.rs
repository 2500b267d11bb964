//! Inventory orchestration.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::aggregates::{ProductVariant, StockLevel};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::Sku;
use crate::error::{AppError, AppResult};
use crate::store::{reason, Store, StoreError};

use super::events::EventPublisher;

/// Bounded optimistic retry for the sale commit. Contention beyond this is
/// surfaced to the caller, whose delivery layer retries with backoff.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl InventoryService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    pub async fn create_variant(
        &self,
        seller_id: i64,
        sku: &str,
        name: &str,
        price: i64,
        initial_stock: u32,
    ) -> AppResult<(ProductVariant, StockLevel)> {
        let sku = Sku::new(sku).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let variant = ProductVariant::create(seller_id, sku, name, price);
        let stock = StockLevel::new(variant.id(), initial_stock);
        self.store.insert_variant(&variant, &stock).await?;
        tracing::info!(variant_id = %variant.id(), sku = %variant.sku(), "variant created");
        Ok((variant, stock))
    }

    pub async fn variant_with_stock(&self, id: Uuid) -> AppResult<(ProductVariant, StockLevel)> {
        let variant = self
            .store
            .variant(id)
            .await?
            .ok_or(AppError::NotFound("product variant"))?;
        let stock = self.store.stock(id).await?.ok_or(AppError::NotFound("stock"))?;
        Ok((variant, stock))
    }

    pub async fn list_variants(&self) -> AppResult<Vec<(ProductVariant, StockLevel)>> {
        let variants = self.store.list_variants().await?;
        let mut out = Vec::with_capacity(variants.len());
        for variant in variants {
            let stock = self
                .store
                .stock(variant.id())
                .await?
                .ok_or(AppError::NotFound("stock"))?;
            out.push((variant, stock));
        }
        Ok(out)
    }

    pub async fn release(
        &self,
        variant_id: Uuid,
        qty: u32,
        ledger_reason: &str,
        order_id: Option<Uuid>,
    ) -> AppResult<()> {
        self.store.release_stock(variant_id, qty, ledger_reason, order_id).await?;
        self.events
            .publish(&DomainEvent::Stock(StockEvent::Released { variant_id, quantity: qty }))
            .await;
        Ok(())
    }

    /// Deduct a confirmed sale with optimistic-concurrency retries.
    ///
    /// Reload-and-swap: read the version, attempt the CAS, and on a conflict
    /// read again. The quantity was reserved earlier, so the only way to lose
    /// the swap is another writer touching the same variant.
    pub async fn commit_sale(
        &self,
        variant_id: Uuid,
        qty: u32,
        order_id: Option<Uuid>,
    ) -> AppResult<StockLevel> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let stock = self
                .store
                .stock(variant_id)
                .await?
                .ok_or(AppError::NotFound("stock"))?;
            match self
                .store
                .commit_stock(variant_id, qty, stock.version(), order_id)
                .await
            {
                Ok(updated) => {
                    self.events
                        .publish(&DomainEvent::Stock(StockEvent::Committed {
                            variant_id,
                            quantity: qty,
                        }))
                        .await;
                    if updated.is_low() {
                        tracing::warn!(
                            %variant_id,
                            available = updated.available(),
                            threshold = updated.low_stock_threshold(),
                            "stock below threshold"
                        );
                        self.events
                            .publish(&DomainEvent::Stock(StockEvent::LowStock {
                                variant_id,
                                available: updated.available(),
                                threshold: updated.low_stock_threshold(),
                            }))
                            .await;
                    }
                    return Ok(updated);
                }
                Err(StoreError::VersionConflict) => {
                    tracing::debug!(%variant_id, attempt, "stock commit lost the swap, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::warn!(%variant_id, attempts = MAX_COMMIT_ATTEMPTS, "stock commit contention");
        Err(AppError::StockContention)
    }

    /// Re-hold units from the open pool, used when a settlement lands after
    /// the owning session already released its reservation.
    pub async fn rehold(&self, variant_id: Uuid, qty: u32, order_id: Option<Uuid>) -> AppResult<()> {
        self.store
            .reserve_stock(variant_id, qty, reason::ORDER_RESERVE, order_id)
            .await?;
        self.events
            .publish(&DomainEvent::Stock(StockEvent::Reserved { variant_id, quantity: qty }))
            .await;
        Ok(())
    }
}
