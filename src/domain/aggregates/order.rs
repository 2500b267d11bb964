//! Order Aggregate
//!
//! Single-variant orders with a payment leg. Amounts are integer minor units.
//! The only state that accepts payment-driven transitions is PendingPayment,
//! which is what makes webhook replays harmless.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: i64,
    seller_id: i64,
    product_variant_id: Uuid,
    buyer_group_session_id: Option<Uuid>,
    quantity: u32,
    unit_price: i64,
    discount_bps: u32,
    subtotal: i64,
    delivery_charge: i64,
    total_amount: i64,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    PendingPayment,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

pub struct NewOrder {
    pub user_id: i64,
    pub seller_id: i64,
    pub product_variant_id: Uuid,
    pub buyer_group_session_id: Option<Uuid>,
    pub quantity: u32,
    pub unit_price: i64,
    pub discount_bps: u32,
    pub delivery_charge: i64,
}

impl Order {
    pub fn create(new: NewOrder) -> Result<Self, OrderError> {
        if new.quantity == 0 {
            return Err(OrderError::EmptyOrder);
        }
        if new.discount_bps > 10_000 {
            return Err(OrderError::InvalidDiscount);
        }
        let gross = new.unit_price * i64::from(new.quantity);
        let subtotal = gross - gross * i64::from(new.discount_bps) / 10_000;
        let total_amount = subtotal + new.delivery_charge;
        let now = Utc::now();
        let id = Uuid::now_v7();
        let order_number = generate_order_number(now);
        let mut order = Self {
            id,
            order_number: order_number.clone(),
            user_id: new.user_id,
            seller_id: new.seller_id,
            product_variant_id: new.product_variant_id,
            buyer_group_session_id: new.buyer_group_session_id,
            quantity: new.quantity,
            unit_price: new.unit_price,
            discount_bps: new.discount_bps,
            subtotal,
            delivery_charge: new.delivery_charge,
            total_amount,
            status: OrderStatus::PendingPayment,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise(DomainEvent::Order(OrderEvent::Created {
            order_id: id,
            order_number,
            user_id: new.user_id,
            total: total_amount,
        }));
        Ok(order)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        order_number: String,
        user_id: i64,
        seller_id: i64,
        product_variant_id: Uuid,
        buyer_group_session_id: Option<Uuid>,
        quantity: u32,
        unit_price: i64,
        discount_bps: u32,
        subtotal: i64,
        delivery_charge: i64,
        total_amount: i64,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id, order_number, user_id, seller_id, product_variant_id, buyer_group_session_id,
            quantity, unit_price, discount_bps, subtotal, delivery_charge, total_amount,
            status, created_at, updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> i64 { self.user_id }
    pub fn seller_id(&self) -> i64 { self.seller_id }
    pub fn product_variant_id(&self) -> Uuid { self.product_variant_id }
    pub fn buyer_group_session_id(&self) -> Option<Uuid> { self.buyer_group_session_id }
    pub fn quantity(&self) -> u32 { self.quantity }
    pub fn unit_price(&self) -> i64 { self.unit_price }
    pub fn discount_bps(&self) -> u32 { self.discount_bps }
    pub fn subtotal(&self) -> i64 { self.subtotal }
    pub fn delivery_charge(&self) -> i64 { self.delivery_charge }
    pub fn total_amount(&self) -> i64 { self.total_amount }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_pending_payment(&self) -> bool { self.status == OrderStatus::PendingPayment }

    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        self.transition_from_pending(OrderStatus::Paid)?;
        self.raise(DomainEvent::Order(OrderEvent::Paid {
            order_id: self.id,
            order_number: self.order_number.clone(),
        }));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition_from_pending(OrderStatus::Cancelled)?;
        self.raise(DomainEvent::Order(OrderEvent::Cancelled {
            order_id: self.id,
            order_number: self.order_number.clone(),
        }));
        Ok(())
    }

    pub fn expire(&mut self) -> Result<(), OrderError> {
        self.transition_from_pending(OrderStatus::Expired)?;
        self.raise(DomainEvent::Order(OrderEvent::Expired {
            order_id: self.id,
            order_number: self.order_number.clone(),
        }));
        Ok(())
    }

    fn transition_from_pending(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status != OrderStatus::PendingPayment {
            return Err(OrderError::NotPending(self.status));
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn generate_order_number(now: DateTime<Utc>) -> String {
    format!("ORD-{}-{:08X}", now.format("%Y%m%d"), rand::random::<u32>())
}

/// Gateway leg of an order.
#[derive(Clone, Debug)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub status: PaymentStatus,
    pub method: String,
    pub bank_code: String,
    pub va_number: Option<String>,
    pub bill_key: Option<String>,
    pub biller_code: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mirrors the gateway's transaction statuses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Settlement,
    Expire,
    Cancel,
    Deny,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settlement => "settlement",
            Self::Expire => "expire",
            Self::Cancel => "cancel",
            Self::Deny => "deny",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "settlement" => Some(Self::Settlement),
            "expire" => Some(Self::Expire),
            "cancel" => Some(Self::Cancel),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl Payment {
    pub fn pending(
        order_id: Uuid,
        amount: i64,
        bank_code: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            order_id,
            amount,
            status: PaymentStatus::Pending,
            method: "bank_transfer".to_string(),
            bank_code: bank_code.into(),
            va_number: None,
            bill_key: None,
            biller_code: None,
            gateway_transaction_id: None,
            expires_at,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn settle(&mut self, at: DateTime<Utc>) {
        self.status = PaymentStatus::Settlement;
        self.paid_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark(&mut self, status: PaymentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    EmptyOrder,
    InvalidDiscount,
    NotPending(OrderStatus),
}
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyOrder => write!(f, "quantity must be positive"),
            Self::InvalidDiscount => write!(f, "discount exceeds 100%"),
            Self::NotPending(s) => write!(f, "order is {}", s.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(discount_bps: u32) -> Order {
        Order::create(NewOrder {
            user_id: 3,
            seller_id: 1,
            product_variant_id: Uuid::now_v7(),
            buyer_group_session_id: None,
            quantity: 2,
            unit_price: 100_000,
            discount_bps,
            delivery_charge: 9_000,
        })
        .unwrap()
    }

    #[test]
    fn totals_apply_discount_in_integer_math() {
        let o = order(1000); // 10%
        assert_eq!(o.subtotal(), 180_000);
        assert_eq!(o.total_amount(), 189_000);
        let full = order(0);
        assert_eq!(full.total_amount(), 209_000);
    }

    #[test]
    fn payment_transitions_only_from_pending() {
        let mut o = order(0);
        o.mark_paid().unwrap();
        assert_eq!(o.status(), OrderStatus::Paid);
        assert_eq!(o.expire(), Err(OrderError::NotPending(OrderStatus::Paid)));
        assert_eq!(o.cancel(), Err(OrderError::NotPending(OrderStatus::Paid)));
        assert_eq!(o.mark_paid(), Err(OrderError::NotPending(OrderStatus::Paid)));
    }

    #[test]
    fn order_number_shape() {
        let o = order(0);
        assert!(o.order_number().starts_with("ORD-"));
        assert_eq!(o.order_number().len(), "ORD-20250101-0A1B2C3D".len());
    }
}
