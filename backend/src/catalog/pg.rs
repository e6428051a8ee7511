use async_trait::async_trait;
use diesel::prelude::*;
use std::path::PathBuf;
use uuid::Uuid;

use super::{
    apply_patch, check_owner, check_patch, schedule_image_removal, CatalogError, CatalogStore,
};
use crate::models::{NewProperty, PropertyPatch, PropertyRecord, PropertyRow};
use crate::schema::properties;

/// Postgres-backed catalog. Connections are established per call and the
/// blocking diesel work runs on the tokio blocking pool.
pub struct PgCatalogStore {
    database_url: String,
    uploads_dir: PathBuf,
}

impl PgCatalogStore {
    pub fn new(database_url: String, uploads_dir: PathBuf) -> Self {
        Self {
            database_url,
            uploads_dir,
        }
    }

    async fn with_conn<T, F>(&self, job: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, CatalogError> + Send + 'static,
    {
        let url = self.database_url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&url)
                .map_err(|e| CatalogError::Storage(format!("database connection: {}", e)))?;
            job(&mut conn)
        })
        .await
        .map_err(|e| CatalogError::Storage(format!("blocking task: {}", e)))?
    }
}

fn storage(err: diesel::result::Error) -> CatalogError {
    CatalogError::Storage(err.to_string())
}

fn load_row(conn: &mut PgConnection, id: Uuid) -> Result<PropertyRow, CatalogError> {
    properties::table
        .find(id)
        .first::<PropertyRow>(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => CatalogError::NotFound(id),
            other => storage(other),
        })
}

fn save_record(conn: &mut PgConnection, record: &PropertyRecord) -> Result<PropertyRow, CatalogError> {
    let row = PropertyRow::from_record(record);
    diesel::update(properties::table.find(record.id))
        .set((
            properties::name.eq(&row.name),
            properties::address.eq(&row.address),
            properties::description.eq(&row.description),
            properties::image_ref.eq(&row.image_ref),
            properties::attributes.eq(&row.attributes),
        ))
        .get_result::<PropertyRow>(conn)
        .map_err(storage)
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
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
        let row = PropertyRow::from_record(&record);
        self.with_conn(move |conn| {
            diesel::insert_into(properties::table)
                .values(&row)
                .get_result::<PropertyRow>(conn)
                .map_err(storage)
        })
        .await
        .map(PropertyRow::into_record)
    }

    async fn get(&self, id: Uuid) -> Result<PropertyRecord, CatalogError> {
        self.with_conn(move |conn| load_row(conn, id))
            .await
            .map(PropertyRow::into_record)
    }

    async fn list(&self) -> Result<Vec<PropertyRecord>, CatalogError> {
        let rows = self
            .with_conn(move |conn| {
                properties::table
                    .order_by(properties::listed_at.desc())
                    .load::<PropertyRow>(conn)
                    .map_err(storage)
            })
            .await?;
        Ok(rows.into_iter().map(PropertyRow::into_record).collect())
    }

    async fn update_owned(
        &self,
        id: Uuid,
        caller_wallet: &str,
        patch: PropertyPatch,
    ) -> Result<PropertyRecord, CatalogError> {
        let caller = caller_wallet.to_string();
        self.with_conn(move |conn| {
            let mut record = load_row(conn, id)?.into_record();
            check_owner(&record.owner, &caller)?;
            check_patch(&record, &patch)?;
            apply_patch(&mut record, patch);
            save_record(conn, &record)
        })
        .await
        .map(PropertyRow::into_record)
    }

    async fn bind_ledger_asset(
        &self,
        id: Uuid,
        asset_id: u64,
    ) -> Result<PropertyRecord, CatalogError> {
        self.with_conn(move |conn| {
            let record = load_row(conn, id)?.into_record();
            match record.ledger_asset_id {
                Some(existing) if existing == asset_id => {
                    return Ok(PropertyRow::from_record(&record));
                }
                Some(existing) => {
                    return Err(CatalogError::Conflict(format!(
                        "listing {} is already bound to ledger asset {}",
                        id, existing
                    )));
                }
                None => {}
            }
            diesel::update(properties::table.find(id))
                .set(properties::ledger_asset_id.eq(Some(asset_id as i64)))
                .get_result::<PropertyRow>(conn)
                .map_err(storage)
        })
        .await
        .map(PropertyRow::into_record)
    }

    async fn delete_owned(&self, id: Uuid, caller_wallet: &str) -> Result<(), CatalogError> {
        let caller = caller_wallet.to_string();
        let image_ref = self
            .with_conn(move |conn| {
                let record = load_row(conn, id)?.into_record();
                check_owner(&record.owner, &caller)?;
                diesel::delete(properties::table.find(id))
                    .execute(conn)
                    .map_err(storage)?;
                Ok(record.image_ref)
            })
            .await?;
        if let Some(image_ref) = image_ref {
            schedule_image_removal(&self.uploads_dir, &image_ref);
        }
        Ok(())
    }
}
