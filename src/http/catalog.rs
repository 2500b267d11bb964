//! Variant catalog handlers. Minimal surface: every group-buy and order
//! operation hangs off a variant with stock.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{ProductVariant, StockLevel};
use crate::error::{AppError, AppResult};

use super::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantRequest {
    pub seller_id: i64,
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 1))]
    pub price: i64,
    pub initial_stock: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub id: Uuid,
    pub seller_id: i64,
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub active: bool,
    pub on_hand: u32,
    pub reserved: u32,
    pub available: u32,
}

impl VariantResponse {
    pub fn from_parts(variant: &ProductVariant, stock: &StockLevel) -> Self {
        Self {
            id: variant.id(),
            seller_id: variant.seller_id(),
            sku: variant.sku().to_string(),
            name: variant.name().to_string(),
            price: variant.price(),
            active: variant.is_active(),
            on_hand: stock.on_hand(),
            reserved: stock.reserved(),
            available: stock.available(),
        }
    }
}

pub async fn create_variant(
    State(s): State<AppState>,
    Json(r): Json<CreateVariantRequest>,
) -> AppResult<(StatusCode, Json<VariantResponse>)> {
    r.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let (variant, stock) = s
        .services
        .inventory
        .create_variant(r.seller_id, &r.sku, &r.name, r.price, r.initial_stock.unwrap_or(0))
        .await?;
    Ok((StatusCode::CREATED, Json(VariantResponse::from_parts(&variant, &stock))))
}

pub async fn get_variant(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VariantResponse>> {
    let (variant, stock) = s.services.inventory.variant_with_stock(id).await?;
    Ok(Json(VariantResponse::from_parts(&variant, &stock)))
}

pub async fn list_variants(State(s): State<AppState>) -> AppResult<Json<Vec<VariantResponse>>> {
    let variants = s.services.inventory.list_variants().await?;
    Ok(Json(
        variants
            .iter()
            .map(|(v, st)| VariantResponse::from_parts(v, st))
            .collect(),
    ))
}
