use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{AssetId, LedgerError, LedgerGateway};

#[derive(Debug, Clone)]
struct SaleAccount {
    owner: String,
    inspector: String,
    buyer: Option<String>,
    escrow: Option<Decimal>,
    inspection_passed: bool,
    approvals: HashMap<String, bool>,
    finalized: bool,
    holder: String,
}

/// In-process escrow ledger enforcing the same role and state gates as the
/// sale contract. Backs the `memory` ledger backend and every test double;
/// the mutation counter makes "zero additional ledger calls" observable.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<AssetId, SaleAccount>>,
    mutations: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls attempted so far, successful or not.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn with_account<T>(
        &self,
        asset: AssetId,
        f: impl FnOnce(&mut SaleAccount) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(&asset)
            .ok_or_else(|| LedgerError::Rejected(format!("asset {} is not listed", asset)))?;
        f(account)
    }

    fn read<T>(&self, asset: AssetId, f: impl FnOnce(&SaleAccount) -> T, missing: T) -> T {
        let accounts = self.accounts.lock().unwrap();
        accounts.get(&asset).map(f).unwrap_or(missing)
    }
}

fn same_wallet(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn listed(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self.accounts.lock().unwrap().contains_key(&asset))
    }

    async fn buyer(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read(asset, |a| a.buyer.clone(), None))
    }

    async fn inspector(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read(asset, |a| Some(a.inspector.clone()), None))
    }

    async fn inspection_passed(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self.read(asset, |a| a.inspection_passed, false))
    }

    async fn approval(&self, asset: AssetId, wallet: &str) -> Result<bool, LedgerError> {
        let key = wallet.to_lowercase();
        Ok(self.read(asset, |a| a.approvals.get(&key).copied().unwrap_or(false), false))
    }

    async fn holder(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read(asset, |a| Some(a.holder.clone()), None))
    }

    async fn finalized(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self.read(asset, |a| a.finalized, false))
    }

    async fn list_asset(
        &self,
        asset: AssetId,
        owner: &str,
        inspector: &str,
    ) -> Result<(), LedgerError> {
        self.record_mutation();
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(&asset) {
            return Err(LedgerError::Rejected(format!(
                "asset {} is already listed",
                asset
            )));
        }
        accounts.insert(
            asset,
            SaleAccount {
                owner: owner.to_string(),
                inspector: inspector.to_string(),
                buyer: None,
                escrow: None,
                inspection_passed: false,
                approvals: HashMap::new(),
                finalized: false,
                holder: owner.to_string(),
            },
        );
        Ok(())
    }

    async fn deposit_earnest(
        &self,
        asset: AssetId,
        value: Decimal,
        caller: &str,
    ) -> Result<(), LedgerError> {
        self.record_mutation();
        self.with_account(asset, |account| {
            if account.finalized {
                return Err(LedgerError::Rejected("sale already finalized".into()));
            }
            if account.buyer.is_some() {
                return Err(LedgerError::Rejected("earnest already deposited".into()));
            }
            if same_wallet(&account.owner, caller) {
                return Err(LedgerError::Rejected("owner cannot deposit".into()));
            }
            if value <= Decimal::ZERO {
                return Err(LedgerError::Rejected("deposit must be positive".into()));
            }
            account.buyer = Some(caller.to_string());
            account.escrow = Some(value);
            Ok(())
        })
    }

    async fn update_inspection_status(
        &self,
        asset: AssetId,
        passed: bool,
        caller: &str,
    ) -> Result<(), LedgerError> {
        self.record_mutation();
        self.with_account(asset, |account| {
            if !same_wallet(&account.inspector, caller) {
                return Err(LedgerError::Rejected(
                    "only the inspector may update inspection status".into(),
                ));
            }
            if account.finalized {
                return Err(LedgerError::Rejected("sale already finalized".into()));
            }
            account.inspection_passed = passed;
            Ok(())
        })
    }

    async fn approve_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
        self.record_mutation();
        self.with_account(asset, |account| {
            if account.finalized {
                return Err(LedgerError::Rejected("sale already finalized".into()));
            }
            account.approvals.insert(caller.to_lowercase(), true);
            Ok(())
        })
    }

    async fn finalize_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
        self.record_mutation();
        self.with_account(asset, |account| {
            if !same_wallet(&account.inspector, caller) {
                return Err(LedgerError::Rejected(
                    "only the inspector may finalize the sale".into(),
                ));
            }
            if account.finalized {
                return Err(LedgerError::Rejected("sale already finalized".into()));
            }
            let Some(buyer) = account.buyer.clone() else {
                return Err(LedgerError::Rejected("no earnest deposit".into()));
            };
            if account.escrow.is_none() {
                return Err(LedgerError::Rejected("escrow is empty".into()));
            }
            if !account.inspection_passed {
                return Err(LedgerError::Rejected("inspection has not passed".into()));
            }
            if !account.approvals.get(&buyer.to_lowercase()).copied().unwrap_or(false) {
                return Err(LedgerError::Rejected("buyer has not approved".into()));
            }
            account.finalized = true;
            account.holder = buyer;
            // escrow pays out to the seller once the sale closes
            account.escrow = None;
            Ok(())
        })
    }
}
