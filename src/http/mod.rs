//! HTTP surface.

mod catalog;
mod groupbuy;
mod orders;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "patungan"})) }))
        .route("/api/v1/variants", get(catalog::list_variants).post(catalog::create_variant))
        .route("/api/v1/variants/:id", get(catalog::get_variant))
        .route("/api/v1/group-buy/sessions", get(groupbuy::list_open_sessions).post(groupbuy::open_session))
        .route("/api/v1/group-buy/sessions/:id", get(groupbuy::get_session))
        .route("/api/v1/group-buy/sessions/:id/end", post(groupbuy::end_session))
        .route("/api/v1/group-buy/sessions/:id/cancel", post(groupbuy::cancel_session))
        .route("/api/v1/group-buy/sellers/:seller_id/sessions", get(groupbuy::seller_sessions))
        .route("/api/v1/group-buy/groups", post(groupbuy::organize_group))
        .route("/api/v1/group-buy/groups/:code", get(groupbuy::get_group))
        .route("/api/v1/group-buy/groups/:code/join", post(groupbuy::join_group))
        .route("/api/v1/orders", get(orders::list_orders).post(orders::create_direct_order))
        .route("/api/v1/orders/group", post(orders::create_group_order))
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/payments/notifications", post(orders::payment_notification))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
