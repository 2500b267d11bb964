//! Application services.

mod events;
mod groupbuy;
mod inventory;
mod orders;

pub use events::EventPublisher;
pub use groupbuy::{EndOutcome, GroupBuyService, OpenSessionInput};
pub use inventory::InventoryService;
pub use orders::{
    DirectOrderInput, GatewayNotification, GroupOrderInput, OrderReceipt, OrderService,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::error::AppError;
use crate::gateway::PaymentGateway;
use crate::scheduler::{Scheduler, Task, TaskHandler};
use crate::store::Store;

/// Service bundle; also the task handler the worker group dispatches into.
#[derive(Clone)]
pub struct Services {
    pub inventory: InventoryService,
    pub groupbuy: GroupBuyService,
    pub orders: OrderService,
    store: Arc<dyn Store>,
    scheduler: Scheduler,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Scheduler,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
        payment_ttl: Duration,
        group_ttl: Duration,
    ) -> Self {
        let inventory = InventoryService::new(Arc::clone(&store), events.clone());
        let groupbuy = GroupBuyService::new(
            Arc::clone(&store),
            scheduler.clone(),
            events.clone(),
            group_ttl,
        );
        let orders = OrderService::new(
            Arc::clone(&store),
            scheduler.clone(),
            gateway,
            inventory.clone(),
            events,
            payment_ttl,
        );
        Self { inventory, groupbuy, orders, store, scheduler }
    }

    /// Re-arm expiry tasks after a restart. The scheduler is in-process, so
    /// deadlines are rebuilt from persisted state; past deadlines fire
    /// immediately and the idempotent handlers absorb any replays.
    pub async fn rearm_pending_tasks(&self) -> Result<usize, AppError> {
        let mut armed = 0;

        for session in self.store.active_sessions().await? {
            self.scheduler
                .schedule_at(Task::SessionEnd { session_id: session.id() }, session.expires_at())
                .await;
            armed += 1;
        }

        for group in self.store.open_buyer_groups().await? {
            self.scheduler
                .schedule_at(
                    Task::BuyerSessionEnd { buyer_session_id: group.id() },
                    group.expires_at(),
                )
                .await;
            armed += 1;
        }

        for order in self.store.pending_orders().await? {
            let deadline = match self.store.payment_for_order(order.id()).await? {
                Some(payment) => payment.expires_at,
                None => chrono::Utc::now(),
            };
            self.scheduler
                .schedule_at(Task::OrderExpiration { order_id: order.id() }, deadline)
                .await;
            armed += 1;
        }

        Ok(armed)
    }
}

#[async_trait]
impl TaskHandler for Services {
    async fn handle(&self, task: &Task) -> Result<(), AppError> {
        match task {
            Task::SessionEnd { session_id } => {
                self.groupbuy.end_session(*session_id).await.map(|_| ())
            }
            Task::BuyerSessionEnd { buyer_session_id } => {
                self.groupbuy.expire_group(*buyer_session_id).await
            }
            Task::OrderExpiration { order_id } => self.orders.expire_order(*order_id).await,
        }
    }
}
