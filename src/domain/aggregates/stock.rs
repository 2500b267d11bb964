//! Stock Aggregate
//!
//! Per-variant inventory counters. `available = on_hand - reserved`; reserving
//! never touches `on_hand`, and a sale is only deducted at `commit`, which is a
//! compare-and-swap on the version counter.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLevel {
    variant_id: Uuid,
    on_hand: Quantity,
    reserved: Quantity,
    low_stock_threshold: u32,
    version: i64,
    updated_at: DateTime<Utc>,
}

pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

impl StockLevel {
    pub fn new(variant_id: Uuid, on_hand: u32) -> Self {
        Self {
            variant_id,
            on_hand: Quantity::new(on_hand),
            reserved: Quantity::default(),
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn restore(
        variant_id: Uuid,
        on_hand: u32,
        reserved: u32,
        low_stock_threshold: u32,
        version: i64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id,
            on_hand: Quantity::new(on_hand),
            reserved: Quantity::new(reserved),
            low_stock_threshold,
            version,
            updated_at,
        }
    }

    pub fn variant_id(&self) -> Uuid { self.variant_id }
    pub fn on_hand(&self) -> u32 { self.on_hand.value() }
    pub fn reserved(&self) -> u32 { self.reserved.value() }
    pub fn version(&self) -> i64 { self.version }
    pub fn low_stock_threshold(&self) -> u32 { self.low_stock_threshold }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Units that can still be sold or reserved.
    pub fn available(&self) -> u32 {
        self.on_hand
            .subtract(self.reserved.value())
            .unwrap_or_default()
            .value()
    }

    pub fn is_low(&self) -> bool { self.available() < self.low_stock_threshold }

    /// Hold `qty` units against a potential sale.
    pub fn reserve(&mut self, qty: u32) -> Result<(), StockError> {
        if self.available() < qty {
            return Err(StockError::InsufficientStock);
        }
        self.reserved = self.reserved.add(qty);
        self.touch();
        Ok(())
    }

    /// Return `qty` reserved units to the sellable pool.
    ///
    /// Clamped at zero: releasing more than is reserved is a reconciliation
    /// artifact, not an error.
    pub fn release(&mut self, qty: u32) {
        self.reserved = self.reserved.subtract(qty).unwrap_or_default();
        self.touch();
    }

    /// Deduct a confirmed sale: both counters drop by `qty`.
    ///
    /// Succeeds only when `expected_version` matches the last-read version;
    /// a mismatch means a concurrent writer got there first and the caller
    /// must reload and retry.
    pub fn commit(&mut self, qty: u32, expected_version: i64) -> Result<(), StockError> {
        if self.version != expected_version {
            return Err(StockError::VersionConflict);
        }
        let on_hand = self.on_hand.subtract(qty).ok_or(StockError::InsufficientStock)?;
        let reserved = self.reserved.subtract(qty).ok_or(StockError::InsufficientStock)?;
        self.on_hand = on_hand;
        self.reserved = reserved;
        self.version += 1;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockError { InsufficientStock, VersionConflict }
impl std::error::Error for StockError {}
impl std::fmt::Display for StockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientStock => write!(f, "insufficient stock"),
            Self::VersionConflict => write!(f, "version conflict"),
        }
    }
}

/// One inventory movement, kept for audit.
#[derive(Clone, Debug)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub on_hand_delta: i64,
    pub reserved_delta: i64,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn record(
        variant_id: Uuid,
        on_hand_delta: i64,
        reserved_delta: i64,
        reason: &str,
        order_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            variant_id,
            on_hand_delta,
            reserved_delta,
            reason: reason.to_string(),
            order_id,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(on_hand: u32) -> StockLevel { StockLevel::new(Uuid::now_v7(), on_hand) }

    #[test]
    fn reserve_respects_available() {
        let mut s = stock(10);
        s.reserve(6).unwrap();
        assert_eq!(s.available(), 4);
        assert_eq!(s.reserve(5), Err(StockError::InsufficientStock));
        s.reserve(4).unwrap();
        assert_eq!(s.available(), 0);
        assert_eq!(s.on_hand(), 10);
    }

    #[test]
    fn release_is_clamped() {
        let mut s = stock(10);
        s.reserve(3).unwrap();
        s.release(5);
        assert_eq!(s.reserved(), 0);
        assert_eq!(s.on_hand(), 10);
    }

    #[test]
    fn commit_checks_version() {
        let mut s = stock(10);
        s.reserve(4).unwrap();
        let v = s.version();
        s.commit(4, v).unwrap();
        assert_eq!(s.on_hand(), 6);
        assert_eq!(s.reserved(), 0);
        assert_eq!(s.version(), v + 1);
        // stale version after the bump
        let mut t = stock(10);
        t.reserve(1).unwrap();
        assert_eq!(t.commit(1, 99), Err(StockError::VersionConflict));
    }

    #[test]
    fn commit_needs_reservation() {
        let mut s = stock(10);
        assert_eq!(s.commit(1, 0), Err(StockError::InsufficientStock));
    }

    #[test]
    fn low_stock_threshold() {
        let mut s = stock(6);
        assert!(!s.is_low());
        s.reserve(2).unwrap();
        let v = s.version();
        s.commit(2, v).unwrap();
        assert!(s.is_low());
    }
}
