use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::AppError;
use crate::ledger::{AssetId, LedgerGateway};
use crate::models::{NewProperty, PropertyRecord};

/// A ledger-listed asset whose catalog link was never persisted. Kept for
/// the operator diagnostics path; the ledger listing itself is not revocable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanEntry {
    pub catalog_id: Uuid,
    pub asset_id: AssetId,
    pub recorded_at: i64,
    pub detail: String,
}

#[derive(Default)]
pub struct OrphanRegistry {
    entries: Mutex<HashMap<Uuid, OrphanEntry>>,
}

impl OrphanRegistry {
    pub fn record(&self, catalog_id: Uuid, asset_id: AssetId, detail: String) {
        let entry = OrphanEntry {
            catalog_id,
            asset_id,
            recorded_at: chrono::Utc::now().timestamp(),
            detail,
        };
        self.entries.lock().unwrap().insert(catalog_id, entry);
    }

    pub fn lookup(&self, catalog_id: Uuid) -> Option<OrphanEntry> {
        self.entries.lock().unwrap().get(&catalog_id).cloned()
    }

    pub fn clear(&self, catalog_id: Uuid) {
        self.entries.lock().unwrap().remove(&catalog_id);
    }

    pub fn list(&self) -> Vec<OrphanEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}

/// The write path used at asset creation: persist the catalog record, bind a
/// ledger asset, link the two. Each step has a defined failure contract; the
/// only inconsistency that can leak is the orphan case, and it is recorded
/// rather than swallowed.
pub struct ListingOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn LedgerGateway>,
    orphans: Arc<OrphanRegistry>,
    inspector_wallet: String,
    next_asset_id: AtomicU64,
}

impl ListingOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn LedgerGateway>,
        orphans: Arc<OrphanRegistry>,
        inspector_wallet: String,
        first_asset_id: AssetId,
    ) -> Self {
        Self {
            catalog,
            ledger,
            orphans,
            inspector_wallet,
            next_asset_id: AtomicU64::new(first_asset_id),
        }
    }

    /// Step 1: persist with no ledger link. If this fails nothing further is
    /// attempted. Steps 2-4 run in `bind`.
    pub async fn list_asset(&self, new: NewProperty) -> Result<PropertyRecord, AppError> {
        let record = self
            .catalog
            .create(new)
            .await
            .map_err(|e| AppError::CatalogWriteFailed(e.to_string()))?;
        self.bind(record).await
    }

    /// Steps 2-4: allocate an asset id, register it on the ledger, then
    /// link the catalog record. A ledger failure leaves the record safely
    /// unlinked and retryable; a link failure after the ledger call is the
    /// orphan case.
    async fn bind(&self, record: PropertyRecord) -> Result<PropertyRecord, AppError> {
        let asset_id = self.allocate_asset_id().await?;

        if let Err(err) = self
            .ledger
            .list_asset(asset_id, &record.owner, &self.inspector_wallet)
            .await
        {
            log::warn!(
                "ledger listing failed for {}, record stays unlisted: {}",
                record.id,
                err
            );
            return Err(AppError::LedgerCallFailed(err.to_string()));
        }

        match self.catalog.bind_ledger_asset(record.id, asset_id).await {
            Ok(updated) => Ok(updated),
            Err(err) => {
                log::error!(
                    "orphaned ledger asset {} for listing {}: catalog link failed: {}",
                    asset_id,
                    record.id,
                    err
                );
                self.orphans.record(record.id, asset_id, err.to_string());
                Err(AppError::OrphanedLedgerAsset {
                    catalog_id: record.id,
                    asset_id,
                })
            }
        }
    }

    /// Ids are unique and monotonic within the process; a collision with an
    /// existing ledger listing is fatal rather than silently retried.
    async fn allocate_asset_id(&self) -> Result<AssetId, AppError> {
        let id = self.next_asset_id.fetch_add(1, Ordering::SeqCst);
        match self.ledger.listed(id).await {
            Ok(false) => Ok(id),
            Ok(true) => Err(AppError::IdGenerationFailed(format!(
                "asset id {} is already listed on the ledger",
                id
            ))),
            Err(err) => Err(AppError::LedgerCallFailed(err.to_string())),
        }
    }

    /// Re-runs the ledger binding for a record left unlinked by an earlier
    /// ledger failure. Owner-only.
    pub async fn relist(&self, id: Uuid, caller_wallet: &str) -> Result<PropertyRecord, AppError> {
        let record = self.catalog.get(id).await?;
        if !record.owner.eq_ignore_ascii_case(caller_wallet) {
            return Err(AppError::Unauthorized(
                "caller does not own this listing".to_string(),
            ));
        }
        if record.ledger_asset_id.is_some() {
            return Err(AppError::PreconditionFailed(
                "listing is already bound to a ledger asset".to_string(),
            ));
        }
        if let Some(entry) = self.orphans.lookup(id) {
            return Err(AppError::OrphanedLedgerAsset {
                catalog_id: id,
                asset_id: entry.asset_id,
            });
        }
        self.bind(record).await
    }

    /// Operator path: retry the catalog link for a recorded orphan and clear
    /// the entry once it sticks.
    pub async fn repair_orphan(&self, id: Uuid) -> Result<PropertyRecord, AppError> {
        let entry = self
            .orphans
            .lookup(id)
            .ok_or_else(|| AppError::NotFound(format!("no orphan recorded for {}", id)))?;
        let updated = self
            .catalog
            .bind_ledger_asset(id, entry.asset_id)
            .await
            .map_err(|e| AppError::CatalogWriteFailed(e.to_string()))?;
        self.orphans.clear(id);
        log::info!(
            "repaired orphaned ledger asset {} for listing {}",
            entry.asset_id,
            id
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::catalog::{CatalogError, MemoryCatalogStore};
    use crate::ledger::{LedgerError, MemoryLedger};
    use crate::models::{Attribute, PropertyPatch};

    const SELLER: &str = "0xSeller";
    const INSPECTOR: &str = "0xI";

    fn new_property(owner: &str) -> NewProperty {
        NewProperty {
            name: "Town House".into(),
            address: "5 Canal Walk".into(),
            description: "two floors".into(),
            image_ref: None,
            attributes: vec![Attribute {
                trait_name: "Purchase Price".into(),
                value: serde_json::json!("2.0"),
            }],
            owner: owner.into(),
        }
    }

    fn orchestrator(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn LedgerGateway>,
        orphans: Arc<OrphanRegistry>,
        first_asset_id: AssetId,
    ) -> ListingOrchestrator {
        ListingOrchestrator::new(catalog, ledger, orphans, INSPECTOR.to_string(), first_asset_id)
    }

    #[tokio::test]
    async fn listing_binds_monotonic_asset_ids() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let orphans = Arc::new(OrphanRegistry::default());
        let orch = orchestrator(catalog.clone(), ledger.clone(), orphans, 1);

        let first = orch.list_asset(new_property(SELLER)).await.unwrap();
        let second = orch.list_asset(new_property(SELLER)).await.unwrap();
        assert_eq!(first.ledger_asset_id, Some(1));
        assert_eq!(second.ledger_asset_id, Some(2));

        // the ledger carries the roles bound at listing time
        assert_eq!(
            ledger.inspector(1).await.unwrap().as_deref(),
            Some(INSPECTOR)
        );
        assert_eq!(ledger.holder(1).await.unwrap().as_deref(), Some(SELLER));
    }

    /// Catalog that is entirely down.
    struct BrokenCatalog;

    #[async_trait]
    impl CatalogStore for BrokenCatalog {
        async fn create(&self, _: NewProperty) -> Result<PropertyRecord, CatalogError> {
            Err(CatalogError::Storage("catalog down".into()))
        }
        async fn get(&self, id: Uuid) -> Result<PropertyRecord, CatalogError> {
            Err(CatalogError::NotFound(id))
        }
        async fn list(&self) -> Result<Vec<PropertyRecord>, CatalogError> {
            Err(CatalogError::Storage("catalog down".into()))
        }
        async fn update_owned(
            &self,
            _: Uuid,
            _: &str,
            _: PropertyPatch,
        ) -> Result<PropertyRecord, CatalogError> {
            Err(CatalogError::Storage("catalog down".into()))
        }
        async fn bind_ledger_asset(
            &self,
            _: Uuid,
            _: u64,
        ) -> Result<PropertyRecord, CatalogError> {
            Err(CatalogError::Storage("catalog down".into()))
        }
        async fn delete_owned(&self, _: Uuid, _: &str) -> Result<(), CatalogError> {
            Err(CatalogError::Storage("catalog down".into()))
        }
    }

    #[tokio::test]
    async fn catalog_write_failure_aborts_before_any_ledger_call() {
        let ledger = Arc::new(MemoryLedger::new());
        let orphans = Arc::new(OrphanRegistry::default());
        let orch = orchestrator(Arc::new(BrokenCatalog), ledger.clone(), orphans, 1);

        let err = orch.list_asset(new_property(SELLER)).await.unwrap_err();
        assert!(matches!(err, AppError::CatalogWriteFailed(_)));
        assert_eq!(ledger.mutation_count(), 0);
    }

    /// Ledger whose listing call fails a configured number of times.
    struct FlakyListLedger {
        inner: Arc<MemoryLedger>,
        failures: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl LedgerGateway for FlakyListLedger {
        async fn listed(&self, asset: AssetId) -> Result<bool, LedgerError> {
            self.inner.listed(asset).await
        }
        async fn buyer(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
            self.inner.buyer(asset).await
        }
        async fn inspector(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
            self.inner.inspector(asset).await
        }
        async fn inspection_passed(&self, asset: AssetId) -> Result<bool, LedgerError> {
            self.inner.inspection_passed(asset).await
        }
        async fn approval(&self, asset: AssetId, wallet: &str) -> Result<bool, LedgerError> {
            self.inner.approval(asset, wallet).await
        }
        async fn holder(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
            self.inner.holder(asset).await
        }
        async fn finalized(&self, asset: AssetId) -> Result<bool, LedgerError> {
            self.inner.finalized(asset).await
        }
        async fn list_asset(
            &self,
            asset: AssetId,
            owner: &str,
            inspector: &str,
        ) -> Result<(), LedgerError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(LedgerError::Timeout);
                }
            }
            self.inner.list_asset(asset, owner, inspector).await
        }
        async fn deposit_earnest(
            &self,
            asset: AssetId,
            value: Decimal,
            caller: &str,
        ) -> Result<(), LedgerError> {
            self.inner.deposit_earnest(asset, value, caller).await
        }
        async fn update_inspection_status(
            &self,
            asset: AssetId,
            passed: bool,
            caller: &str,
        ) -> Result<(), LedgerError> {
            self.inner.update_inspection_status(asset, passed, caller).await
        }
        async fn approve_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
            self.inner.approve_sale(asset, caller).await
        }
        async fn finalize_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
            self.inner.finalize_sale(asset, caller).await
        }
    }

    #[tokio::test]
    async fn ledger_failure_leaves_the_record_unlisted_and_retryable() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let inner = Arc::new(MemoryLedger::new());
        let flaky = Arc::new(FlakyListLedger {
            inner: inner.clone(),
            failures: std::sync::Mutex::new(1),
        });
        let orphans = Arc::new(OrphanRegistry::default());
        let orch = orchestrator(catalog.clone(), flaky, orphans, 1);

        let err = orch.list_asset(new_property(SELLER)).await.unwrap_err();
        assert!(matches!(err, AppError::LedgerCallFailed(_)));

        // the record persisted but stayed safely unlinked
        let records = catalog.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.ledger_asset_id, None);

        // a non-owner cannot retry the binding
        let err = orch.relist(record.id, "0xEvil").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let bound = orch.relist(record.id, "0xSELLER").await.unwrap();
        assert!(bound.ledger_asset_id.is_some());
        assert!(inner.listed(bound.ledger_asset_id.unwrap()).await.unwrap());

        let err = orch.relist(record.id, SELLER).await.unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed(_)));
    }

    /// Catalog whose bind step fails once, after the ledger call succeeded.
    struct FlakyBindCatalog {
        inner: MemoryCatalogStore,
        failures: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl CatalogStore for FlakyBindCatalog {
        async fn create(&self, new: NewProperty) -> Result<PropertyRecord, CatalogError> {
            self.inner.create(new).await
        }
        async fn get(&self, id: Uuid) -> Result<PropertyRecord, CatalogError> {
            self.inner.get(id).await
        }
        async fn list(&self) -> Result<Vec<PropertyRecord>, CatalogError> {
            self.inner.list().await
        }
        async fn update_owned(
            &self,
            id: Uuid,
            caller: &str,
            patch: PropertyPatch,
        ) -> Result<PropertyRecord, CatalogError> {
            self.inner.update_owned(id, caller, patch).await
        }
        async fn bind_ledger_asset(
            &self,
            id: Uuid,
            asset_id: u64,
        ) -> Result<PropertyRecord, CatalogError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(CatalogError::Storage("connection reset".into()));
                }
            }
            self.inner.bind_ledger_asset(id, asset_id).await
        }
        async fn delete_owned(&self, id: Uuid, caller: &str) -> Result<(), CatalogError> {
            self.inner.delete_owned(id, caller).await
        }
    }

    #[tokio::test]
    async fn orphan_is_recorded_and_repairable() {
        let catalog = Arc::new(FlakyBindCatalog {
            inner: MemoryCatalogStore::new(),
            failures: std::sync::Mutex::new(1),
        });
        let ledger = Arc::new(MemoryLedger::new());
        let orphans = Arc::new(OrphanRegistry::default());
        let orch = orchestrator(catalog.clone(), ledger.clone(), orphans.clone(), 1);

        let err = orch.list_asset(new_property(SELLER)).await.unwrap_err();
        let AppError::OrphanedLedgerAsset {
            catalog_id,
            asset_id,
        } = err
        else {
            panic!("expected an orphan, got {:?}", err);
        };

        // the ledger has the asset, the catalog link does not
        assert!(ledger.listed(asset_id).await.unwrap());
        assert_eq!(
            catalog.get(catalog_id).await.unwrap().ledger_asset_id,
            None
        );

        // queryable through the diagnostics path
        let entries = orphans.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].asset_id, asset_id);

        // relist must not double-list a recorded orphan
        let err = orch.relist(catalog_id, SELLER).await.unwrap_err();
        assert!(matches!(err, AppError::OrphanedLedgerAsset { .. }));

        let repaired = orch.repair_orphan(catalog_id).await.unwrap();
        assert_eq!(repaired.ledger_asset_id, Some(asset_id));
        assert!(orphans.list().is_empty());
    }

    #[tokio::test]
    async fn asset_id_collision_is_fatal() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        ledger.list_asset(1, SELLER, INSPECTOR).await.unwrap();

        let orphans = Arc::new(OrphanRegistry::default());
        let orch = orchestrator(catalog, ledger, orphans, 1);
        let err = orch.list_asset(new_property(SELLER)).await.unwrap_err();
        assert!(matches!(err, AppError::IdGenerationFailed(_)));
    }
}
