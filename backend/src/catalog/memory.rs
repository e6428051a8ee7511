use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{apply_patch, check_owner, check_patch, CatalogError, CatalogStore};
use crate::models::{NewProperty, PropertyPatch, PropertyRecord};

/// Catalog backend holding records in process memory. Used by tests and by
/// the `memory` backend of the binary so the server runs without Postgres.
#[derive(Default)]
pub struct MemoryCatalogStore {
    records: Mutex<HashMap<Uuid, PropertyRecord>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn create(&self, new: NewProperty) -> Result<PropertyRecord, CatalogError> {
        let record = PropertyRecord {
            id: Uuid::new_v4(),
            name: new.name,
            address: new.address,
            description: new.description,
            image_ref: new.image_ref,
            owner: new.owner,
            ledger_asset_id: None,
            attributes: new.attributes,
            listed_at: chrono::Utc::now().timestamp(),
        };
        self.records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<PropertyRecord, CatalogError> {
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<PropertyRecord>, CatalogError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn update_owned(
        &self,
        id: Uuid,
        caller_wallet: &str,
        patch: PropertyPatch,
    ) -> Result<PropertyRecord, CatalogError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        check_owner(&record.owner, caller_wallet)?;
        check_patch(record, &patch)?;
        apply_patch(record, patch);
        Ok(record.clone())
    }

    async fn bind_ledger_asset(
        &self,
        id: Uuid,
        asset_id: u64,
    ) -> Result<PropertyRecord, CatalogError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        match record.ledger_asset_id {
            Some(existing) if existing == asset_id => {}
            Some(existing) => {
                return Err(CatalogError::Conflict(format!(
                    "listing {} is already bound to ledger asset {}",
                    id, existing
                )));
            }
            None => record.ledger_asset_id = Some(asset_id),
        }
        Ok(record.clone())
    }

    async fn delete_owned(&self, id: Uuid, caller_wallet: &str) -> Result<(), CatalogError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get(&id).ok_or(CatalogError::NotFound(id))?;
        check_owner(&record.owner, caller_wallet)?;
        if let Some(image_ref) = &record.image_ref {
            log::debug!("no uploads directory for memory catalog, leaving {}", image_ref);
        }
        records.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_property(owner: &str) -> NewProperty {
        NewProperty {
            name: "Cottage".into(),
            address: "2 Elm St".into(),
            description: "small".into(),
            image_ref: None,
            attributes: Vec::new(),
            owner: owner.into(),
        }
    }

    #[tokio::test]
    async fn owner_match_is_case_insensitive() {
        let store = MemoryCatalogStore::new();
        let record = store.create(new_property("0xAbC")).await.unwrap();

        let patch = PropertyPatch {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        let updated = store.update_owned(record.id, "0xABC", patch).await.unwrap();
        assert_eq!(updated.name, "Renamed");

        let patch = PropertyPatch {
            name: Some("Nope".into()),
            ..Default::default()
        };
        let err = store.update_owned(record.id, "0xEvil", patch).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn owner_change_is_rejected() {
        let store = MemoryCatalogStore::new();
        let record = store.create(new_property("0xAbC")).await.unwrap();

        let patch = PropertyPatch {
            owner: Some("0xOther".into()),
            ..Default::default()
        };
        let err = store.update_owned(record.id, "0xAbC", patch).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unauthorized(_)));

        // echoing the same owner back is fine
        let patch = PropertyPatch {
            owner: Some("0xABC".into()),
            description: Some("bigger".into()),
            ..Default::default()
        };
        let updated = store.update_owned(record.id, "0xAbC", patch).await.unwrap();
        assert_eq!(updated.description, "bigger");
    }

    #[tokio::test]
    async fn ledger_asset_id_binds_once() {
        let store = MemoryCatalogStore::new();
        let record = store.create(new_property("0xAbC")).await.unwrap();

        let bound = store.bind_ledger_asset(record.id, 7).await.unwrap();
        assert_eq!(bound.ledger_asset_id, Some(7));

        // idempotent re-bind of the same id
        store.bind_ledger_asset(record.id, 7).await.unwrap();

        let err = store.bind_ledger_asset(record.id, 8).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_requires_ownership() {
        let store = MemoryCatalogStore::new();
        let record = store.create(new_property("0xAbC")).await.unwrap();

        let err = store.delete_owned(record.id, "0xEvil").await.unwrap_err();
        assert!(matches!(err, CatalogError::Unauthorized(_)));

        store.delete_owned(record.id, "0xabc").await.unwrap();
        let err = store.get(record.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }
}
