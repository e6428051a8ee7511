use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

pub mod memory;
pub mod solana;

pub use memory::MemoryLedger;
pub use solana::SolanaLedger;

pub type AssetId = u64;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The contract refused the call (role or state check failed on-ledger).
    #[error("ledger rejected the call: {0}")]
    Rejected(String),

    /// Transport-level failure; the call may or may not have landed.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The configured deadline elapsed before confirmation was observed.
    #[error("ledger call exceeded its deadline")]
    Timeout,
}

impl LedgerError {
    /// Transient failures may be retried for idempotent reads. Mutating
    /// calls are never retried silently.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout)
    }
}

/// Ledger-resident sale state for one asset, as read through the gateway in
/// a single merge pass. Never cached across merges.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleState {
    pub asset_id: AssetId,
    pub buyer: Option<String>,
    pub inspector: Option<String>,
    pub inspection_passed: bool,
    /// The approval flag for the current buyer; false when no buyer exists.
    pub buyer_approved: bool,
    pub finalized: bool,
    pub holder: Option<String>,
}

/// Read/invoke interface to the sale contract. Mutating calls are committed
/// only once their confirmation is observed; a returned error after a
/// submitted call means the outcome must be re-read, not assumed.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn listed(&self, asset: AssetId) -> Result<bool, LedgerError>;

    async fn buyer(&self, asset: AssetId) -> Result<Option<String>, LedgerError>;

    async fn inspector(&self, asset: AssetId) -> Result<Option<String>, LedgerError>;

    async fn inspection_passed(&self, asset: AssetId) -> Result<bool, LedgerError>;

    async fn approval(&self, asset: AssetId, wallet: &str) -> Result<bool, LedgerError>;

    async fn holder(&self, asset: AssetId) -> Result<Option<String>, LedgerError>;

    async fn finalized(&self, asset: AssetId) -> Result<bool, LedgerError>;

    async fn list_asset(
        &self,
        asset: AssetId,
        owner: &str,
        inspector: &str,
    ) -> Result<(), LedgerError>;

    async fn deposit_earnest(
        &self,
        asset: AssetId,
        value: Decimal,
        caller: &str,
    ) -> Result<(), LedgerError>;

    async fn update_inspection_status(
        &self,
        asset: AssetId,
        passed: bool,
        caller: &str,
    ) -> Result<(), LedgerError>;

    async fn approve_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError>;

    async fn finalize_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError>;
}
