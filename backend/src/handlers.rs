use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, AuthUser, Role};
use crate::error::{AppError, Rejection};
use crate::listing::OrphanEntry;
use crate::models::{
    decimal_from_value, ListingType, NewProperty, PropertyPatch, PropertyRecord,
};
use crate::reconcile::{BrowseFilter, SaleView, Transition};
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub wallet: String,
    #[serde(default)]
    pub role: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let role = Role::parse(req.role.as_deref().unwrap_or("user"));
    let token = auth::create_token(&req.wallet, role, &state.config.jwt_secret)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("token issue failed: {}", e)))?;
    Ok(Json(json!({
        "token": token,
        "wallet": req.wallet,
        "role": role.as_str(),
    })))
}

#[derive(Deserialize, Default)]
pub struct BrowseParams {
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub q: Option<String>,
    pub owner: Option<String>,
    pub pending_inspection: Option<bool>,
}

fn parse_listing_type(value: &str) -> Option<ListingType> {
    if value.eq_ignore_ascii_case("buy") {
        Some(ListingType::Buy)
    } else if value.eq_ignore_ascii_case("lease") || value.eq_ignore_ascii_case("rent") {
        Some(ListingType::Lease)
    } else {
        None
    }
}

pub async fn browse_properties(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<Vec<SaleView>>, AppError> {
    let filter = BrowseFilter {
        listing_type: params.listing_type.as_deref().and_then(parse_listing_type),
        query: params.q,
        owner: params.owner,
        pending_inspection: params.pending_inspection.unwrap_or(false),
    };
    let views = state.reconciler.browse(&filter).await?;
    Ok(Json(views))
}

pub async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SaleView>, AppError> {
    let view = state.reconciler.get_view(id).await?;
    Ok(Json(view))
}

pub async fn create_property(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(mut new): Json<NewProperty>,
) -> Result<(StatusCode, Json<PropertyRecord>), AppError> {
    new.owner = user.wallet;
    let record = state.orchestrator.list_asset(new).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn relist_property(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<PropertyRecord>, AppError> {
    let record = state.orchestrator.relist(id, &user.wallet).await?;
    Ok(Json(record))
}

pub async fn update_property(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(patch): Json<PropertyPatch>,
) -> Result<Json<PropertyRecord>, AppError> {
    let record = state.catalog.update_owned(id, &user.wallet, patch).await?;
    Ok(Json(record))
}

pub async fn delete_property(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.reconciler.delete_listing(id, &user.wallet).await?;
    Ok(Json(json!({"message": "Property deleted successfully"})))
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: serde_json::Value,
}

pub async fn deposit_earnest(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<SaleView>, Rejection> {
    let amount = decimal_from_value(&req.amount).ok_or_else(|| {
        Rejection::bare(AppError::PreconditionFailed(
            "amount must be a decimal number".to_string(),
        ))
    })?;
    let view = state
        .reconciler
        .request_transition(id, Transition::DepositEarnest { amount }, &user.wallet)
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
pub struct InspectionRequest {
    #[serde(default = "default_passed")]
    pub passed: bool,
}

fn default_passed() -> bool {
    true
}

pub async fn pass_inspection(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<InspectionRequest>>,
) -> Result<Json<SaleView>, Rejection> {
    let passed = body.map(|Json(req)| req.passed).unwrap_or(true);
    if !passed {
        // the state machine is forward-only; there is no back-transition
        return Err(Rejection::bare(AppError::PreconditionFailed(
            "inspection status can only move forward".to_string(),
        )));
    }
    let view = state
        .reconciler
        .request_transition(id, Transition::PassInspection, &user.wallet)
        .await?;
    Ok(Json(view))
}

pub async fn approve_sale(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SaleView>, Rejection> {
    let view = state
        .reconciler
        .request_transition(id, Transition::ApproveSale, &user.wallet)
        .await?;
    Ok(Json(view))
}

pub async fn finalize_sale(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SaleView>, Rejection> {
    let view = state
        .reconciler
        .request_transition(id, Transition::FinalizeSale, &user.wallet)
        .await?;
    Ok(Json(view))
}

fn require_admin(user: &AuthUser) -> Result<(), AppError> {
    if user.role != Role::Admin {
        return Err(AppError::Unauthorized("admin role required".to_string()));
    }
    Ok(())
}

pub async fn list_orphans(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<OrphanEntry>>, AppError> {
    require_admin(&user)?;
    Ok(Json(state.orphans.list()))
}

pub async fn repair_orphan(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<PropertyRecord>, AppError> {
    require_admin(&user)?;
    let record = state.orchestrator.repair_orphan(id).await?;
    Ok(Json(record))
}
