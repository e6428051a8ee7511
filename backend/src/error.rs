use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::ledger::LedgerError;
use crate::reconcile::SaleView;

/// Top-level error taxonomy. Local validation failures resolve before any
/// network call; remote failures carry the store-specific kind.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("precondition no longer valid: {0}")]
    PreconditionNoLongerValid(String),

    #[error("catalog write failed: {0}")]
    CatalogWriteFailed(String),

    #[error("ledger call failed: {0}")]
    LedgerCallFailed(String),

    #[error("listing {catalog_id} is bound to ledger asset {asset_id} but the catalog link was never persisted")]
    OrphanedLedgerAsset { catalog_id: Uuid, asset_id: u64 },

    #[error("sale in progress for listing {0}")]
    SaleInProgress(Uuid),

    #[error("ledger state for asset {asset_id} is inconsistent: {flags}")]
    LedgerInconsistent { asset_id: u64, flags: String },

    #[error("asset id generation failed: {0}")]
    IdGenerationFailed(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            AppError::PreconditionNoLongerValid(_) => "PRECONDITION_NO_LONGER_VALID",
            AppError::CatalogWriteFailed(_) => "CATALOG_WRITE_FAILED",
            AppError::LedgerCallFailed(_) => "LEDGER_CALL_FAILED",
            AppError::OrphanedLedgerAsset { .. } => "ORPHANED_LEDGER_ASSET",
            AppError::SaleInProgress(_) => "SALE_IN_PROGRESS",
            AppError::LedgerInconsistent { .. } => "LEDGER_INCONSISTENT",
            AppError::IdGenerationFailed(_) => "ID_GENERATION_FAILED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::PreconditionFailed(_)
            | AppError::PreconditionNoLongerValid(_)
            | AppError::SaleInProgress(_) => StatusCode::CONFLICT,
            AppError::LedgerCallFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::CatalogWriteFailed(_)
            | AppError::OrphanedLedgerAsset { .. }
            | AppError::LedgerInconsistent { .. }
            | AppError::IdGenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => AppError::NotFound(format!("listing {}", id)),
            CatalogError::Unauthorized(msg) => AppError::Unauthorized(msg),
            CatalogError::Storage(msg) | CatalogError::Conflict(msg) => {
                AppError::CatalogWriteFailed(msg)
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::LedgerCallFailed(err.to_string())
    }
}

/// Wire shape for failures. Rejected transitions carry the freshest
/// `SaleView` that could be read so the caller can re-render actual state.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<SaleView>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            view: None,
        });
        (status, body).into_response()
    }
}

/// A refused transition: the error plus the current merged view when one
/// could still be read.
#[derive(Debug)]
pub struct Rejection {
    pub error: AppError,
    pub view: Option<SaleView>,
}

impl Rejection {
    pub fn bare(error: AppError) -> Self {
        Rejection { error, view: None }
    }

    pub fn with_view(error: AppError, view: SaleView) -> Self {
        Rejection {
            error,
            view: Some(view),
        }
    }
}

impl From<AppError> for Rejection {
    fn from(error: AppError) -> Self {
        Rejection::bare(error)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
            code: self.error.code(),
            view: self.view,
        });
        (status, body).into_response()
    }
}
