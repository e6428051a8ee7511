use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewProperty, PropertyPatch, PropertyRecord};

pub mod memory;
pub mod pg;

pub use memory::MemoryCatalogStore;
pub use pg::PgCatalogStore;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("listing {0} not found")]
    NotFound(Uuid),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Read/write interface over the catalog. The catalog knows nothing about
/// sale progress; its only business rule is owner-match authorization on
/// mutation, compared case-insensitively.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create(&self, new: NewProperty) -> Result<PropertyRecord, CatalogError>;

    async fn get(&self, id: Uuid) -> Result<PropertyRecord, CatalogError>;

    async fn list(&self) -> Result<Vec<PropertyRecord>, CatalogError>;

    /// Fails with `Unauthorized` if the caller is not the stored owner or the
    /// patch would change the owner.
    async fn update_owned(
        &self,
        id: Uuid,
        caller_wallet: &str,
        patch: PropertyPatch,
    ) -> Result<PropertyRecord, CatalogError>;

    /// Sets `ledger_asset_id` once. Re-binding the same id is a no-op;
    /// binding a different id violates the set-once invariant.
    async fn bind_ledger_asset(&self, id: Uuid, asset_id: u64)
        -> Result<PropertyRecord, CatalogError>;

    /// Deletes an owned record and schedules removal of its image asset.
    /// Image removal failure is logged, never fatal.
    async fn delete_owned(&self, id: Uuid, caller_wallet: &str) -> Result<(), CatalogError>;
}

pub(crate) fn check_owner(stored: &str, caller: &str) -> Result<(), CatalogError> {
    if !stored.eq_ignore_ascii_case(caller) {
        return Err(CatalogError::Unauthorized(
            "caller does not own this listing".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_patch(record: &PropertyRecord, patch: &PropertyPatch) -> Result<(), CatalogError> {
    if let Some(owner) = &patch.owner {
        if !owner.eq_ignore_ascii_case(&record.owner) {
            return Err(CatalogError::Unauthorized(
                "listing owner cannot be changed".to_string(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn apply_patch(record: &mut PropertyRecord, patch: PropertyPatch) {
    if let Some(name) = patch.name {
        record.name = name;
    }
    if let Some(address) = patch.address {
        record.address = address;
    }
    if let Some(description) = patch.description {
        record.description = description;
    }
    if let Some(image_ref) = patch.image_ref {
        record.image_ref = Some(image_ref);
    }
    if let Some(attributes) = patch.attributes {
        record.attributes = attributes;
    }
}

/// Best-effort removal of the uploaded image backing a deleted listing. Only
/// the file name of the stored reference is honored, resolved under the
/// configured uploads directory.
pub(crate) fn schedule_image_removal(uploads_dir: &Path, image_ref: &str) {
    let Some(file_name) = Path::new(image_ref).file_name() else {
        log::warn!("image reference {:?} has no file name, skipping removal", image_ref);
        return;
    };
    let path: PathBuf = uploads_dir.join(file_name);
    tokio::spawn(async move {
        if let Err(err) = tokio::fs::remove_file(&path).await {
            log::warn!("failed to delete image file {:?}: {}", path, err);
        }
    });
}
