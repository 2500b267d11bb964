//! Group-buy session and buyer group handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    BuyerGroupSession, DiscountTier, GroupBuySession, GroupMember, JoinOutcome,
};
use crate::error::{AppError, AppResult};
use crate::services::OpenSessionInput;

use super::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OpenSessionRequest {
    pub seller_id: i64,
    pub product_variant_id: Uuid,
    #[validate(range(min = 1))]
    pub committed_quantity: u32,
    #[validate(range(min = 1))]
    pub min_participants: u32,
    #[validate(range(min = 1))]
    pub max_participants: u32,
    #[validate]
    #[serde(default)]
    pub tiers: Vec<TierRequest>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TierRequest {
    #[validate(range(min = 1))]
    pub min_participants: u32,
    #[validate(range(min = 1, max = 10_000))]
    pub discount_bps: u32,
}

#[derive(Debug, Serialize)]
pub struct TierResponse { pub min_participants: u32, pub discount_bps: u32 }

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub seller_id: i64,
    pub product_variant_id: Uuid,
    pub committed_quantity: u32,
    pub min_participants: u32,
    pub max_participants: u32,
    pub tiers: Vec<TierResponse>,
    pub status: String,
    pub units_sold: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&GroupBuySession> for SessionResponse {
    fn from(s: &GroupBuySession) -> Self {
        Self {
            id: s.id(),
            seller_id: s.seller_id(),
            product_variant_id: s.product_variant_id(),
            committed_quantity: s.committed_quantity(),
            min_participants: s.min_participants(),
            max_participants: s.max_participants(),
            tiers: s
                .tiers()
                .iter()
                .map(|t| TierResponse { min_participants: t.min_participants, discount_bps: t.discount_bps })
                .collect(),
            status: s.status().as_str().to_string(),
            units_sold: s.units_sold(),
            expires_at: s.expires_at(),
            created_at: s.created_at(),
        }
    }
}

pub async fn open_session(
    State(s): State<AppState>,
    Json(r): Json<OpenSessionRequest>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    r.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let session = s
        .services
        .groupbuy
        .open_session(OpenSessionInput {
            seller_id: r.seller_id,
            product_variant_id: r.product_variant_id,
            committed_quantity: r.committed_quantity,
            min_participants: r.min_participants,
            max_participants: r.max_participants,
            tiers: r
                .tiers
                .into_iter()
                .map(|t| DiscountTier { min_participants: t.min_participants, discount_bps: t.discount_bps })
                .collect(),
            expires_at: r.expires_at,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

pub async fn get_session(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionResponse>> {
    let session = s.services.groupbuy.session(id).await?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn list_open_sessions(State(s): State<AppState>) -> AppResult<Json<Vec<SessionResponse>>> {
    let sessions = s.services.groupbuy.open_sessions().await?;
    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

pub async fn seller_sessions(
    State(s): State<AppState>,
    Path(seller_id): Path<i64>,
) -> AppResult<Json<Vec<SessionResponse>>> {
    let sessions = s.services.groupbuy.sessions_for_seller(seller_id).await?;
    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct SellerActionRequest { pub seller_id: i64 }

pub async fn end_session(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<SellerActionRequest>,
) -> AppResult<StatusCode> {
    s.services.groupbuy.end_session_for_seller(id, r.seller_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_session(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<SellerActionRequest>,
) -> AppResult<StatusCode> {
    s.services.groupbuy.cancel_session(id, r.seller_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrganizeGroupRequest {
    pub group_buy_session_id: Uuid,
    pub organizer_user_id: i64,
    #[validate(length(min = 1, max = 120))]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub code: String,
    pub group_buy_session_id: Uuid,
    pub organizer_user_id: i64,
    pub title: String,
    pub current_participants: u32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&BuyerGroupSession> for GroupResponse {
    fn from(g: &BuyerGroupSession) -> Self {
        Self {
            id: g.id(),
            code: g.code().to_string(),
            group_buy_session_id: g.group_buy_session_id(),
            organizer_user_id: g.organizer_user_id(),
            title: g.title().to_string(),
            current_participants: g.current_participants(),
            status: g.status().as_str().to_string(),
            expires_at: g.expires_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: i64,
    pub quantity: u32,
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

impl From<&GroupMember> for MemberResponse {
    fn from(m: &GroupMember) -> Self {
        Self {
            user_id: m.user_id,
            quantity: m.quantity,
            status: m.status.as_str().to_string(),
            joined_at: m.joined_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupDetailResponse {
    pub group: GroupResponse,
    pub session: SessionResponse,
    pub members: Vec<MemberResponse>,
}

pub async fn organize_group(
    State(s): State<AppState>,
    Json(r): Json<OrganizeGroupRequest>,
) -> AppResult<(StatusCode, Json<GroupResponse>)> {
    r.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let group = s
        .services
        .groupbuy
        .organize_group(r.group_buy_session_id, r.organizer_user_id, &r.title)
        .await?;
    Ok((StatusCode::CREATED, Json(GroupResponse::from(&group))))
}

pub async fn get_group(
    State(s): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<GroupDetailResponse>> {
    let (group, session, members) = s.services.groupbuy.group_by_code(&code).await?;
    Ok(Json(GroupDetailResponse {
        group: GroupResponse::from(&group),
        session: SessionResponse::from(&session),
        members: members.iter().map(MemberResponse::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest { pub user_id: i64 }

pub async fn join_group(
    State(s): State<AppState>,
    Path(code): Path<String>,
    Json(r): Json<JoinGroupRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let outcome = s.services.groupbuy.join_group(&code, r.user_id).await?;
    let outcome = match outcome {
        JoinOutcome::Joined => "joined",
        JoinOutcome::AlreadyMember => "already_member",
    };
    Ok(Json(serde_json::json!({ "outcome": outcome })))
}
