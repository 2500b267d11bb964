//! Order handlers and the payment gateway webhook.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Order, Payment};
use crate::error::{AppError, AppResult};
use crate::services::{DirectOrderInput, GatewayNotification, GroupOrderInput, OrderReceipt};

use super::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub product_variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: u32,
    #[validate(length(min = 1, max = 16))]
    pub bank_code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupOrderRequest {
    pub user_id: i64,
    pub buyer_group_session_id: Uuid,
    #[validate(length(min = 1, max = 16))]
    pub bank_code: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub bank_code: String,
    pub va_number: Option<String>,
    pub bill_key: Option<String>,
    pub biller_code: Option<String>,
    pub amount: i64,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentResponse {
    fn from(p: &Payment) -> Self {
        Self {
            bank_code: p.bank_code.clone(),
            va_number: p.va_number.clone(),
            bill_key: p.bill_key.clone(),
            biller_code: p.biller_code.clone(),
            amount: p.amount,
            status: p.status.as_str().to_string(),
            expires_at: p.expires_at,
            paid_at: p.paid_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub product_variant_id: Uuid,
    pub buyer_group_session_id: Option<Uuid>,
    pub quantity: u32,
    pub unit_price: i64,
    pub discount_bps: u32,
    pub subtotal: i64,
    pub delivery_charge: i64,
    pub total_amount: i64,
    pub created_at: DateTime<Utc>,
    pub payment: Option<PaymentResponse>,
}

impl OrderResponse {
    fn from_parts(order: &Order, payment: Option<&Payment>) -> Self {
        Self {
            id: order.id(),
            order_number: order.order_number().to_string(),
            status: order.status().as_str().to_string(),
            product_variant_id: order.product_variant_id(),
            buyer_group_session_id: order.buyer_group_session_id(),
            quantity: order.quantity(),
            unit_price: order.unit_price(),
            discount_bps: order.discount_bps(),
            subtotal: order.subtotal(),
            delivery_charge: order.delivery_charge(),
            total_amount: order.total_amount(),
            created_at: order.created_at(),
            payment: payment.map(PaymentResponse::from),
        }
    }
}

impl From<&OrderReceipt> for OrderResponse {
    fn from(r: &OrderReceipt) -> Self {
        Self::from_parts(&r.order, Some(&r.payment))
    }
}

pub async fn create_direct_order(
    State(s): State<AppState>,
    Json(r): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<OrderResponse>)> {
    r.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let receipt = s
        .services
        .orders
        .create_direct_order(DirectOrderInput {
            user_id: r.user_id,
            product_variant_id: r.product_variant_id,
            quantity: r.quantity,
            bank_code: r.bank_code,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&receipt))))
}

pub async fn create_group_order(
    State(s): State<AppState>,
    Json(r): Json<CreateGroupOrderRequest>,
) -> AppResult<(StatusCode, Json<OrderResponse>)> {
    r.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let receipt = s
        .services
        .orders
        .create_group_order(GroupOrderInput {
            user_id: r.user_id,
            buyer_group_session_id: r.buyer_group_session_id,
            bank_code: r.bank_code,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&receipt))))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub user_id: i64,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: i64,
    pub page: u32,
}

pub async fn list_orders(
    State(s): State<AppState>,
    Query(p): Query<ListOrdersParams>,
) -> AppResult<Json<OrderListResponse>> {
    let (orders, total, page) = s
        .services
        .orders
        .orders_for_user(p.user_id, p.page.unwrap_or(1), p.per_page.unwrap_or(10))
        .await?;
    Ok(Json(OrderListResponse {
        orders: orders
            .iter()
            .map(|(o, pay)| OrderResponse::from_parts(o, pay.as_ref()))
            .collect(),
        total,
        page,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GetOrderParams { pub user_id: i64 }

pub async fn get_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Query(p): Query<GetOrderParams>,
) -> AppResult<Json<OrderResponse>> {
    let (order, payment) = s.services.orders.order_for_user(id, p.user_id).await?;
    Ok(Json(OrderResponse::from_parts(&order, payment.as_ref())))
}

/// Gateway webhook. Always answers 200 on handled statuses so the gateway
/// stops retrying; signature failures are 4xx.
pub async fn payment_notification(
    State(s): State<AppState>,
    Json(n): Json<GatewayNotification>,
) -> AppResult<Json<serde_json::Value>> {
    s.services.orders.handle_gateway_notification(&n).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
