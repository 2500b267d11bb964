//! Application errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("insufficient stock")]
    InsufficientStock,

    #[error("stock is being updated concurrently, try again")]
    StockContention,

    #[error("group is full")]
    GroupFull,

    #[error("you already organize an open group")]
    GroupAlreadyOrganized,

    #[error("session is no longer active")]
    SessionClosed,

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("payment gateway: {0}")]
    Gateway(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock => AppError::InsufficientStock,
            StoreError::VersionConflict => AppError::StockContention,
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientStock
            | AppError::GroupFull
            | AppError::GroupAlreadyOrganized
            | AppError::SessionClosed
            | AppError::StockContention => StatusCode::CONFLICT,
            AppError::InvalidSignature => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
