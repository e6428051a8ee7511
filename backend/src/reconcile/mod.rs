use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::{AppError, Rejection};
use crate::ledger::{AssetId, LedgerError, LedgerGateway, SaleState};
use crate::listing::OrphanRegistry;
use crate::models::{ListingType, PropertyRecord};

/// Canonical sale stages, strictly forward. `NotListed` is the implicit
/// catalog-only stage before a ledger asset exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    NotListed,
    Listed,
    EarnestDeposited,
    InspectionPassed,
    Approved,
    Finalized,
}

impl Stage {
    /// Pure stage derivation from the ledger flags. Combinations unreachable
    /// under the forward-only ordering are a ledger inconsistency, never
    /// silently mapped to a stage.
    pub fn derive(
        buyer_present: bool,
        inspection_passed: bool,
        buyer_approved: bool,
        finalized: bool,
    ) -> Result<Stage, String> {
        match (buyer_present, inspection_passed, buyer_approved, finalized) {
            (false, false, false, false) => Ok(Stage::Listed),
            (true, false, false, false) => Ok(Stage::EarnestDeposited),
            (true, true, false, false) => Ok(Stage::InspectionPassed),
            (true, true, true, false) => Ok(Stage::Approved),
            (true, true, true, true) => Ok(Stage::Finalized),
            (b, i, a, f) => Err(format!(
                "buyer={} inspected={} approved={} finalized={}",
                b, i, a, f
            )),
        }
    }
}

/// Merged projection of one catalog record and its ledger state. Ephemeral;
/// recomputed from fresh reads on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleView {
    pub property: PropertyRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale: Option<SaleState>,
    pub stage: Stage,
    pub is_buy_in_progress: bool,
    pub is_sold_out: bool,
}

impl SaleView {
    fn not_listed(property: PropertyRecord) -> Self {
        SaleView {
            property,
            sale: None,
            stage: Stage::NotListed,
            is_buy_in_progress: false,
            is_sold_out: false,
        }
    }

    fn merged(property: PropertyRecord, sale: SaleState, stage: Stage) -> Self {
        let is_buy_in_progress = sale.buyer.is_some() && !sale.finalized;
        let is_sold_out = sale.finalized;
        SaleView {
            property,
            sale: Some(sale),
            stage,
            is_buy_in_progress,
            is_sold_out,
        }
    }
}

/// A requested sale transition with its payload.
#[derive(Debug, Clone)]
pub enum Transition {
    DepositEarnest { amount: Decimal },
    PassInspection,
    ApproveSale,
    FinalizeSale,
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::DepositEarnest { .. } => "deposit earnest",
            Transition::PassInspection => "pass inspection",
            Transition::ApproveSale => "approve sale",
            Transition::FinalizeSale => "finalize sale",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrowseFilter {
    pub listing_type: Option<ListingType>,
    /// Case-insensitive substring match on the postal address.
    pub query: Option<String>,
    pub owner: Option<String>,
    /// Only listings waiting on the inspector (earnest deposited, not yet
    /// inspected).
    pub pending_inspection: bool,
}

fn same_wallet(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// The listing-lifecycle reconciliation engine. Stateless between calls:
/// both stores are re-read on every merge, and the ledger is the sole source
/// of truth for sale progress.
pub struct Reconciler {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn LedgerGateway>,
    orphans: Arc<OrphanRegistry>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn LedgerGateway>,
        orphans: Arc<OrphanRegistry>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            orphans,
        }
    }

    pub async fn get_view(&self, id: Uuid) -> Result<SaleView, AppError> {
        let record = self.catalog.get(id).await?;
        self.merge(record).await
    }

    /// Joins one record with its ledger state. A record without a ledger
    /// asset id is `NotListed` unless the orphan registry knows better.
    async fn merge(&self, record: PropertyRecord) -> Result<SaleView, AppError> {
        let Some(asset_id) = record.ledger_asset_id else {
            if let Some(entry) = self.orphans.lookup(record.id) {
                return Err(AppError::OrphanedLedgerAsset {
                    catalog_id: record.id,
                    asset_id: entry.asset_id,
                });
            }
            return Ok(SaleView::not_listed(record));
        };
        let state = self.read_sale_state(asset_id).await?;
        let stage = Stage::derive(
            state.buyer.is_some(),
            state.inspection_passed,
            state.buyer_approved,
            state.finalized,
        )
        .map_err(|flags| AppError::LedgerInconsistent { asset_id, flags })?;
        Ok(SaleView::merged(record, state, stage))
    }

    /// One full ledger-side read. Retried once transparently on transient
    /// failure; merges are idempotent so the retry is safe.
    async fn read_sale_state(&self, asset: AssetId) -> Result<SaleState, AppError> {
        match self.try_read_sale_state(asset).await {
            Err(err) if err.is_transient() => {
                log::warn!("transient ledger read failure for asset {}: {}, retrying", asset, err);
                self.try_read_sale_state(asset).await.map_err(AppError::from)
            }
            other => other.map_err(AppError::from),
        }
        .and_then(|state| {
            state.ok_or_else(|| AppError::NotFound(format!("ledger asset {}", asset)))
        })
    }

    async fn try_read_sale_state(
        &self,
        asset: AssetId,
    ) -> Result<Option<SaleState>, LedgerError> {
        if !self.ledger.listed(asset).await? {
            return Ok(None);
        }
        let buyer = self.ledger.buyer(asset).await?;
        let inspector = self.ledger.inspector(asset).await?;
        let inspection_passed = self.ledger.inspection_passed(asset).await?;
        let buyer_approved = match &buyer {
            Some(buyer) => self.ledger.approval(asset, buyer).await?,
            None => false,
        };
        let finalized = self.ledger.finalized(asset).await?;
        let holder = self.ledger.holder(asset).await?;
        Ok(Some(SaleState {
            asset_id: asset,
            buyer,
            inspector,
            inspection_passed,
            buyer_approved,
            finalized,
            holder,
        }))
    }

    pub async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<SaleView>, AppError> {
        let records = self.catalog.list().await?;
        let mut views = Vec::new();
        for record in records {
            if let Some(owner) = &filter.owner {
                if !same_wallet(&record.owner, owner) {
                    continue;
                }
            }
            if let Some(query) = &filter.query {
                if !record
                    .address
                    .to_lowercase()
                    .contains(&query.to_lowercase())
                {
                    continue;
                }
            }
            if let Some(listing_type) = filter.listing_type {
                if record.listing_type() != listing_type {
                    continue;
                }
            }
            let id = record.id;
            let view = match self.merge(record).await {
                Ok(view) => view,
                Err(err) => {
                    log::warn!("skipping listing {} in browse: {}", id, err);
                    continue;
                }
            };
            // a finalized sale listing is sold and leaves the "for sale" view
            if filter.listing_type == Some(ListingType::Buy) && view.is_sold_out {
                continue;
            }
            if filter.pending_inspection && view.stage != Stage::EarnestDeposited {
                continue;
            }
            views.push(view);
        }
        Ok(views)
    }

    /// Validates and forwards one transition. Local role and state checks
    /// resolve before any ledger round trip; the ledger remains the final
    /// authority and a call that loses a race is reported as such.
    pub async fn request_transition(
        &self,
        id: Uuid,
        transition: Transition,
        caller_wallet: &str,
    ) -> Result<SaleView, Rejection> {
        let record = self.catalog.get(id).await.map_err(AppError::from)?;

        if record.listing_type() == ListingType::Lease {
            let view = self.merge(record).await.ok();
            return Err(Rejection {
                error: AppError::PreconditionFailed(
                    "lease listings do not enter the sale flow".to_string(),
                ),
                view,
            });
        }

        let view = self.merge(record.clone()).await.map_err(Rejection::bare)?;
        let Some(state) = view.sale.clone() else {
            return Err(Rejection::with_view(
                AppError::PreconditionFailed("asset is not listed on the ledger".to_string()),
                view,
            ));
        };

        // fail fast on the caller's role before spending a ledger round trip
        if let Err(err) = authorize(&transition, &record, &state, caller_wallet) {
            return Err(Rejection::with_view(err, view));
        }

        // an already-satisfied transition is a no-op reporting current state
        if already_satisfied(&transition, &state, caller_wallet) {
            return Ok(view);
        }

        if let Err(err) = check_precondition(&transition, &record, &state) {
            return Err(Rejection::with_view(err, view));
        }

        let asset = state.asset_id;
        let call = match &transition {
            Transition::DepositEarnest { amount } => {
                self.ledger
                    .deposit_earnest(asset, *amount, caller_wallet)
                    .await
            }
            Transition::PassInspection => {
                self.ledger
                    .update_inspection_status(asset, true, caller_wallet)
                    .await
            }
            Transition::ApproveSale => self.ledger.approve_sale(asset, caller_wallet).await,
            Transition::FinalizeSale => self.ledger.finalize_sale(asset, caller_wallet).await,
        };

        match call {
            Ok(()) => self.get_view(id).await.map_err(Rejection::bare),
            Err(err) => {
                // the precondition held when we merged; find out whether a
                // concurrent transition invalidated it before blaming the ledger
                match self.merge(record.clone()).await {
                    Ok(fresh) => {
                        let raced = fresh
                            .sale
                            .as_ref()
                            .map(|fresh_state| {
                                check_precondition(&transition, &record, fresh_state).is_err()
                            })
                            .unwrap_or(false);
                        if raced {
                            Err(Rejection::with_view(
                                AppError::PreconditionNoLongerValid(format!(
                                    "{} was overtaken by a concurrent transition",
                                    transition.name()
                                )),
                                fresh,
                            ))
                        } else {
                            Err(Rejection::with_view(
                                AppError::LedgerCallFailed(err.to_string()),
                                fresh,
                            ))
                        }
                    }
                    Err(_) => Err(Rejection::bare(AppError::LedgerCallFailed(err.to_string()))),
                }
            }
        }
    }

    /// Owner delete, refused as soon as a buyer deposit exists: catalog
    /// authorization alone is insufficient once ledger state has advanced.
    pub async fn delete_listing(&self, id: Uuid, caller_wallet: &str) -> Result<(), AppError> {
        let record = self.catalog.get(id).await?;
        let view = self.merge(record).await?;
        if view.stage > Stage::Listed {
            return Err(AppError::SaleInProgress(id));
        }
        self.catalog.delete_owned(id, caller_wallet).await?;
        Ok(())
    }
}

fn authorize(
    transition: &Transition,
    record: &PropertyRecord,
    state: &SaleState,
    caller: &str,
) -> Result<(), AppError> {
    match transition {
        Transition::DepositEarnest { .. } => {
            if same_wallet(&record.owner, caller) {
                return Err(AppError::Unauthorized(
                    "the owner cannot buy their own listing".to_string(),
                ));
            }
        }
        Transition::PassInspection | Transition::FinalizeSale => {
            let authorized = state
                .inspector
                .as_deref()
                .map(|inspector| same_wallet(inspector, caller))
                .unwrap_or(false);
            if !authorized {
                return Err(AppError::Unauthorized(format!(
                    "only the assigned inspector may {}",
                    transition.name()
                )));
            }
        }
        Transition::ApproveSale => {
            let authorized = state
                .buyer
                .as_deref()
                .map(|buyer| same_wallet(buyer, caller))
                .unwrap_or(false);
            if !authorized {
                return Err(AppError::Unauthorized(
                    "only the buyer may approve the sale".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn already_satisfied(transition: &Transition, state: &SaleState, caller: &str) -> bool {
    match transition {
        Transition::DepositEarnest { .. } => state
            .buyer
            .as_deref()
            .map(|buyer| same_wallet(buyer, caller))
            .unwrap_or(false),
        Transition::PassInspection => state.inspection_passed,
        Transition::ApproveSale => state.buyer_approved,
        Transition::FinalizeSale => state.finalized,
    }
}

fn check_precondition(
    transition: &Transition,
    record: &PropertyRecord,
    state: &SaleState,
) -> Result<(), AppError> {
    match transition {
        Transition::DepositEarnest { amount } => {
            if state.buyer.is_some() {
                return Err(AppError::PreconditionFailed(
                    "a buyer has already deposited earnest".to_string(),
                ));
            }
            let Some(price) = record.listed_price() else {
                return Err(AppError::PreconditionFailed(
                    "listing has no purchase price".to_string(),
                ));
            };
            if *amount != price {
                return Err(AppError::PreconditionFailed(format!(
                    "deposit of {} does not match the listed price {}",
                    amount, price
                )));
            }
        }
        Transition::PassInspection => {
            if state.buyer.is_none() {
                return Err(AppError::PreconditionFailed(
                    "no earnest deposit to inspect".to_string(),
                ));
            }
            if state.inspection_passed {
                return Err(AppError::PreconditionFailed(
                    "inspection already passed".to_string(),
                ));
            }
        }
        Transition::ApproveSale => {
            if !state.inspection_passed {
                return Err(AppError::PreconditionFailed(
                    "inspection has not passed".to_string(),
                ));
            }
            if state.buyer_approved {
                return Err(AppError::PreconditionFailed(
                    "sale already approved".to_string(),
                ));
            }
        }
        Transition::FinalizeSale => {
            if state.buyer.is_none()
                || !state.inspection_passed
                || !state.buyer_approved
            {
                return Err(AppError::PreconditionFailed(
                    "sale is not ready to finalize".to_string(),
                ));
            }
            if state.finalized {
                return Err(AppError::PreconditionFailed(
                    "sale already finalized".to_string(),
                ));
            }
        }
    }
    Ok(())
}
