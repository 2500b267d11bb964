//! Product Variant Aggregate

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::value_objects::Sku;

/// A sellable product variant. Prices are integer minor units.
#[derive(Clone, Debug)]
pub struct ProductVariant {
    id: Uuid,
    seller_id: i64,
    sku: Sku,
    name: String,
    price: i64,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductVariant {
    pub fn create(seller_id: i64, sku: Sku, name: impl Into<String>, price: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            seller_id,
            sku,
            name: name.into(),
            price,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        seller_id: i64,
        sku: Sku,
        name: String,
        price: i64,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self { id, seller_id, sku, name, price, active, created_at, updated_at }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn seller_id(&self) -> i64 { self.seller_id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> i64 { self.price }
    pub fn is_active(&self) -> bool { self.active }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_create() {
        let v = ProductVariant::create(7, Sku::new("KB-61-RED").unwrap(), "Keyboard 61 Red", 450_000);
        assert!(v.is_active());
        assert_eq!(v.price(), 450_000);
        assert_eq!(v.seller_id(), 7);
    }
}
