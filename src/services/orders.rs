//! Order creation, payment webhook handling, and payment-window expiry.
//!
//! Direct orders hold their own stock reservation; group orders draw on the
//! parent session's committed reservation. Every status transition out of
//! PendingPayment goes through a conditional store write, so gateway webhook
//! replays and the expiry task cannot double-apply effects.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    MemberStatus, NewOrder, Order, OrderStatus, Payment, PaymentStatus,
};
use crate::error::{AppError, AppResult};
use crate::gateway::PaymentGateway;
use crate::scheduler::{Scheduler, Task};
use crate::store::{reason, Store};

use super::events::EventPublisher;
use super::inventory::InventoryService;

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    scheduler: Scheduler,
    gateway: Arc<dyn PaymentGateway>,
    inventory: InventoryService,
    events: EventPublisher,
    payment_ttl: Duration,
}

pub struct DirectOrderInput {
    pub user_id: i64,
    pub product_variant_id: Uuid,
    pub quantity: u32,
    pub bank_code: String,
}

pub struct GroupOrderInput {
    pub user_id: i64,
    pub buyer_group_session_id: Uuid,
    pub bank_code: String,
}

#[derive(Debug)]
pub struct OrderReceipt {
    pub order: Order,
    pub payment: Payment,
}

/// Gateway webhook body. `order_id` carries our order number.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Scheduler,
        gateway: Arc<dyn PaymentGateway>,
        inventory: InventoryService,
        events: EventPublisher,
        payment_ttl: Duration,
    ) -> Self {
        Self { store, scheduler, gateway, inventory, events, payment_ttl }
    }

    pub async fn create_direct_order(&self, input: DirectOrderInput) -> AppResult<OrderReceipt> {
        let variant = self
            .store
            .variant(input.product_variant_id)
            .await?
            .ok_or(AppError::NotFound("product variant"))?;
        if !variant.is_active() {
            return Err(AppError::BadRequest("variant is not active".into()));
        }

        let mut order = Order::create(NewOrder {
            user_id: input.user_id,
            seller_id: variant.seller_id(),
            product_variant_id: variant.id(),
            buyer_group_session_id: None,
            quantity: input.quantity,
            unit_price: variant.price(),
            discount_bps: 0,
            delivery_charge: 0,
        })
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

        // Availability check and reservation are one atomic write.
        self.store.create_order_reserving_stock(&order).await?;
        self.events.publish_all(order.take_events()).await;

        self.checkout(order, &input.bank_code).await
    }

    pub async fn create_group_order(&self, input: GroupOrderInput) -> AppResult<OrderReceipt> {
        let group = self
            .store
            .buyer_group(input.buyer_group_session_id)
            .await?
            .ok_or(AppError::NotFound("buyer group"))?;
        let members = self.store.group_members(group.id()).await?;
        let member = members
            .iter()
            .find(|m| m.user_id == input.user_id)
            .cloned()
            .ok_or(AppError::Forbidden("not a member of this group"))?;

        let session = self
            .store
            .session(group.group_buy_session_id())
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;
        if !session.is_active() {
            return Err(AppError::SessionClosed);
        }
        let variant = self
            .store
            .variant(session.product_variant_id())
            .await?
            .ok_or(AppError::NotFound("product variant"))?;

        let discount_bps = session
            .best_tier_for(group.current_participants())
            .map(|t| t.discount_bps)
            .unwrap_or(0);

        // One unit per member; the stock was committed to the session when it
        // opened, so no fresh reservation here.
        let mut order = Order::create(NewOrder {
            user_id: input.user_id,
            seller_id: session.seller_id(),
            product_variant_id: variant.id(),
            buyer_group_session_id: Some(group.id()),
            quantity: 1,
            unit_price: variant.price(),
            discount_bps,
            delivery_charge: 0,
        })
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
        self.store.insert_order(&order).await?;
        self.events.publish_all(order.take_events()).await;

        let mut member = member;
        member.order_id = Some(order.id());
        self.store.update_member(&member).await?;

        self.checkout(order, &input.bank_code).await
    }

    /// Charge the gateway, persist the payment leg, and arm the expiry task.
    /// A gateway failure cancels the order and releases any reservation it
    /// holds.
    async fn checkout(&self, order: Order, bank_code: &str) -> AppResult<OrderReceipt> {
        let expires_at = Utc::now() + self.payment_ttl;
        match self
            .gateway
            .charge_va(order.order_number(), order.total_amount(), bank_code, expires_at)
            .await
        {
            Ok(charge) => {
                let mut payment =
                    Payment::pending(order.id(), order.total_amount(), bank_code, charge.expires_at);
                payment.va_number = charge.va_number;
                payment.bill_key = charge.bill_key;
                payment.biller_code = charge.biller_code;
                payment.gateway_transaction_id = Some(charge.transaction_id);
                self.store.insert_payment(&payment).await?;

                self.scheduler
                    .schedule_at(Task::OrderExpiration { order_id: order.id() }, charge.expires_at)
                    .await;

                tracing::info!(
                    order_number = order.order_number(),
                    total = order.total_amount(),
                    bank = %payment.bank_code,
                    va = payment.va_number.as_deref().unwrap_or("-"),
                    "order created"
                );
                Ok(OrderReceipt { order, payment })
            }
            Err(err) => {
                tracing::error!(
                    order_number = order.order_number(),
                    error = %err,
                    "charge failed, cancelling order"
                );
                let mut order = order;
                if order.cancel().is_ok()
                    && self
                        .store
                        .transition_order(&order, OrderStatus::PendingPayment)
                        .await?
                    && order.buyer_group_session_id().is_none()
                {
                    self.inventory
                        .release(
                            order.product_variant_id(),
                            order.quantity(),
                            reason::ORDER_RELEASE,
                            Some(order.id()),
                        )
                        .await?;
                }
                self.events.publish_all(order.take_events()).await;
                Err(AppError::Gateway(err.to_string()))
            }
        }
    }

    pub async fn orders_for_user(
        &self,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> AppResult<(Vec<(Order, Option<Payment>)>, i64, u32)> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 50);
        let offset = i64::from((page - 1) * per_page);
        let (orders, total) = self
            .store
            .orders_for_user(user_id, i64::from(per_page), offset)
            .await?;
        let mut out = Vec::with_capacity(orders.len());
        for order in orders {
            let payment = self.store.payment_for_order(order.id()).await?;
            out.push((order, payment));
        }
        Ok((out, total, page))
    }

    pub async fn order_for_user(&self, order_id: Uuid, user_id: i64) -> AppResult<(Order, Option<Payment>)> {
        let order = self.store.order(order_id).await?.ok_or(AppError::NotFound("order"))?;
        if order.user_id() != user_id {
            // Existence is not leaked to other users.
            return Err(AppError::NotFound("order"));
        }
        let payment = self.store.payment_for_order(order.id()).await?;
        Ok((order, payment))
    }

    /// Map a gateway notification onto order/payment state.
    pub async fn handle_gateway_notification(&self, n: &GatewayNotification) -> AppResult<()> {
        if !self.gateway.verify_signature(
            &n.order_id,
            &n.status_code,
            &n.gross_amount,
            &n.signature_key,
        ) {
            tracing::warn!(order_number = %n.order_id, "webhook signature rejected");
            return Err(AppError::InvalidSignature);
        }

        let order = self
            .store
            .order_by_number(&n.order_id)
            .await?
            .ok_or(AppError::NotFound("order"))?;
        let payment = self
            .store
            .payment_for_order(order.id())
            .await?
            .ok_or(AppError::NotFound("payment"))?;

        match n.transaction_status.as_str() {
            "settlement" | "capture" => self.settle(order, payment).await,
            "pending" => {
                tracing::info!(order_number = %n.order_id, "payment pending");
                Ok(())
            }
            "expire" => self.close_unpaid(order, payment, PaymentStatus::Expire).await,
            "cancel" => self.close_unpaid(order, payment, PaymentStatus::Cancel).await,
            "deny" => self.close_unpaid(order, payment, PaymentStatus::Deny).await,
            other => {
                // Unknown statuses are acked so the gateway stops retrying.
                tracing::warn!(order_number = %n.order_id, status = other, "unhandled transaction status");
                Ok(())
            }
        }
    }

    async fn settle(&self, mut order: Order, mut payment: Payment) -> AppResult<()> {
        if order.mark_paid().is_err() {
            tracing::info!(order_number = order.order_number(), "settlement replay, skipping");
            return Ok(());
        }
        // The conditional write is the concurrency gate: exactly one
        // settlement attempt wins.
        if !self
            .store
            .transition_order(&order, OrderStatus::PendingPayment)
            .await?
        {
            tracing::info!(order_number = order.order_number(), "order already settled elsewhere");
            return Ok(());
        }

        payment.settle(Utc::now());
        self.store.update_payment(&payment).await?;

        if let Some(group_id) = order.buyer_group_session_id() {
            self.settle_group_bookkeeping(&order, group_id).await?;
        }

        self.inventory
            .commit_sale(order.product_variant_id(), order.quantity(), Some(order.id()))
            .await?;

        tracing::info!(order_number = order.order_number(), "payment settled");
        self.events.publish_all(order.take_events()).await;
        Ok(())
    }

    /// Count the sale against the parent session and flip the member to paid.
    /// If the session already finalized (settlement racing the expiry task),
    /// its reservation is gone, so the unit is re-held from the open pool
    /// before the deduct.
    async fn settle_group_bookkeeping(&self, order: &Order, group_id: Uuid) -> AppResult<()> {
        let group = self
            .store
            .buyer_group(group_id)
            .await?
            .ok_or(AppError::NotFound("buyer group"))?;
        let mut session = self
            .store
            .session(group.group_buy_session_id())
            .await?
            .ok_or(AppError::NotFound("group-buy session"))?;

        match session.record_sale(order.quantity()) {
            Ok(()) => self.store.update_session(&session).await?,
            Err(err) => {
                tracing::warn!(
                    order_number = order.order_number(),
                    session_id = %session.id(),
                    error = %err,
                    "session cannot absorb sale, re-holding from open pool"
                );
                self.inventory
                    .rehold(order.product_variant_id(), order.quantity(), Some(order.id()))
                    .await?;
            }
        }

        let members = self.store.group_members(group_id).await?;
        if let Some(mut member) = members.into_iter().find(|m| m.user_id == order.user_id()) {
            member.status = MemberStatus::Paid;
            member.order_id = Some(order.id());
            self.store.update_member(&member).await?;
        }
        Ok(())
    }

    /// Webhook-driven terminal transition for unpaid orders.
    async fn close_unpaid(
        &self,
        mut order: Order,
        mut payment: Payment,
        status: PaymentStatus,
    ) -> AppResult<()> {
        let result = match status {
            PaymentStatus::Expire => order.expire(),
            _ => order.cancel(),
        };
        if result.is_err() {
            tracing::info!(order_number = order.order_number(), "close replay, skipping");
            return Ok(());
        }
        if !self
            .store
            .transition_order(&order, OrderStatus::PendingPayment)
            .await?
        {
            return Ok(());
        }

        payment.mark(status);
        self.store.update_payment(&payment).await?;

        if order.buyer_group_session_id().is_none() {
            self.inventory
                .release(
                    order.product_variant_id(),
                    order.quantity(),
                    reason::ORDER_RELEASE,
                    Some(order.id()),
                )
                .await?;
        }

        tracing::info!(
            order_number = order.order_number(),
            status = order.status().as_str(),
            "order closed unpaid"
        );
        self.events.publish_all(order.take_events()).await;
        Ok(())
    }

    /// Payment-window expiry task. Only pending orders are affected; the
    /// gateway transaction is cancelled best-effort.
    pub async fn expire_order(&self, order_id: Uuid) -> AppResult<()> {
        let mut order = self.store.order(order_id).await?.ok_or(AppError::NotFound("order"))?;
        if order.expire().is_err() {
            tracing::debug!(
                order_number = order.order_number(),
                status = order.status().as_str(),
                "order not pending, skipping expiration"
            );
            return Ok(());
        }
        if !self
            .store
            .transition_order(&order, OrderStatus::PendingPayment)
            .await?
        {
            return Ok(());
        }

        if let Some(mut payment) = self.store.payment_for_order(order.id()).await? {
            payment.mark(PaymentStatus::Expire);
            self.store.update_payment(&payment).await?;
        }

        if order.buyer_group_session_id().is_none() {
            self.inventory
                .release(
                    order.product_variant_id(),
                    order.quantity(),
                    reason::ORDER_RELEASE,
                    Some(order.id()),
                )
                .await?;
        }

        if let Err(err) = self.gateway.cancel_transaction(order.order_number()).await {
            tracing::warn!(
                order_number = order.order_number(),
                error = %err,
                "gateway cancel failed"
            );
        }

        tracing::info!(order_number = order.order_number(), "order expired");
        self.events.publish_all(order.take_events()).await;
        Ok(())
    }
}
