//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use patungan::domain::aggregates::Order;
use patungan::gateway::{notification_signature, GatewayError, PaymentGateway, VaCharge};
use patungan::scheduler::{RetryPolicy, Scheduler, WorkerGroup};
use patungan::services::{EventPublisher, GatewayNotification, Services};
use patungan::store::{MemStore, Store};

pub const SERVER_KEY: &str = "test-server-key";

/// Deterministic gateway double: hands out fixed VA numbers, records charges
/// and cancellations, and verifies signatures with the shared scheme.
pub struct MockGateway {
    server_key: String,
    counter: AtomicU64,
    pub fail_charges: AtomicBool,
    pub charges: Mutex<Vec<(String, i64, String)>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            server_key: SERVER_KEY.to_string(),
            counter: AtomicU64::new(0),
            fail_charges: AtomicBool::new(false),
            charges: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge_va(
        &self,
        order_number: &str,
        amount: i64,
        bank_code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VaCharge, GatewayError> {
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                code: "500".to_string(),
                message: "simulated outage".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.charges
            .lock()
            .await
            .push((order_number.to_string(), amount, bank_code.to_string()));
        Ok(VaCharge {
            transaction_id: format!("mock-txn-{n}"),
            bank: bank_code.to_string(),
            va_number: Some(format!("98800{n:06}")),
            bill_key: None,
            biller_code: None,
            expires_at,
        })
    }

    async fn cancel_transaction(&self, order_number: &str) -> Result<(), GatewayError> {
        self.cancelled.lock().await.push(order_number.to_string());
        Ok(())
    }

    fn verify_signature(
        &self,
        order_number: &str,
        status_code: &str,
        gross_amount: &str,
        signature_key: &str,
    ) -> bool {
        signature_key == notification_signature(order_number, status_code, gross_amount, &self.server_key)
    }
}

pub struct TestApp {
    pub store: Arc<MemStore>,
    pub scheduler: Scheduler,
    pub gateway: Arc<MockGateway>,
    pub services: Services,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_ttls(Duration::minutes(5), Duration::hours(1))
    }

    pub fn with_ttls(payment_ttl: Duration, group_ttl: Duration) -> Self {
        let store = Arc::new(MemStore::new());
        let scheduler = Scheduler::new();
        let gateway = Arc::new(MockGateway::new());
        let store_dyn: Arc<dyn Store> = store.clone();
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();
        let services = Services::new(
            store_dyn,
            scheduler.clone(),
            gateway_dyn,
            EventPublisher::disabled(),
            payment_ttl,
            group_ttl,
        );
        Self { store, scheduler, gateway, services }
    }

    /// A fresh scheduler and service bundle over the same store and gateway,
    /// as after a process restart.
    pub fn restarted_from(app: &TestApp) -> Self {
        let scheduler = Scheduler::new();
        let store_dyn: Arc<dyn Store> = app.store.clone();
        let gateway_dyn: Arc<dyn PaymentGateway> = app.gateway.clone();
        let services = Services::new(
            store_dyn,
            scheduler.clone(),
            gateway_dyn,
            EventPublisher::disabled(),
            Duration::minutes(5),
            Duration::hours(1),
        );
        Self {
            store: Arc::clone(&app.store),
            scheduler,
            gateway: Arc::clone(&app.gateway),
            services,
        }
    }

    /// Workers with a fast retry policy so failing tasks settle quickly.
    pub fn spawn_workers(&self, n: usize) -> WorkerGroup {
        WorkerGroup::spawn(
            n,
            self.scheduler.clone(),
            Arc::new(self.services.clone()),
            RetryPolicy {
                base_delay: std::time::Duration::from_millis(5),
                multiplier: 1.0,
                max_attempts: 3,
            },
        )
    }

    pub async fn seed_variant(&self, seller_id: i64, price: i64, stock: u32) -> Uuid {
        let (variant, _) = self
            .services
            .inventory
            .create_variant(seller_id, &format!("SKU-{}", Uuid::now_v7().simple()), "Test Variant", price, stock)
            .await
            .expect("seed variant");
        variant.id()
    }

    pub async fn available(&self, variant_id: Uuid) -> (u32, u32, u32) {
        let stock = self
            .store
            .stock(variant_id)
            .await
            .expect("stock query")
            .expect("stock row");
        (stock.on_hand(), stock.reserved(), stock.available())
    }
}

pub fn notification(order: &Order, transaction_status: &str) -> GatewayNotification {
    let status_code = "200".to_string();
    let gross_amount = format!("{}.00", order.total_amount());
    let signature_key = notification_signature(
        order.order_number(),
        &status_code,
        &gross_amount,
        SERVER_KEY,
    );
    GatewayNotification {
        order_id: order.order_number().to_string(),
        status_code,
        gross_amount,
        signature_key,
        transaction_status: transaction_status.to_string(),
        transaction_id: Some("mock-txn-0".to_string()),
        payment_type: Some("bank_transfer".to_string()),
    }
}

/// Poll until `check` passes or the deadline lapses.
pub async fn wait_for<F, Fut>(timeout: std::time::Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
