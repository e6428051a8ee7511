use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_program,
    transaction::Transaction,
};
use std::str::FromStr;
use std::time::Duration;

use super::{AssetId, LedgerError, LedgerGateway};

const LAMPORTS_PER_UNIT: u64 = 1_000_000_000;

/// On-chain layout of one sale account, borsh-encoded by the escrow program.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct SaleAccountData {
    owner: String,
    inspector: String,
    buyer: Option<String>,
    escrow_lamports: u64,
    inspection_passed: bool,
    approvals: Vec<(String, bool)>,
    finalized: bool,
    holder: String,
}

#[derive(BorshSerialize)]
enum EscrowInstruction {
    ListAsset {
        asset_id: u64,
        owner: String,
        inspector: String,
    },
    DepositEarnest {
        asset_id: u64,
        lamports: u64,
    },
    UpdateInspection {
        asset_id: u64,
        passed: bool,
    },
    ApproveSale {
        asset_id: u64,
    },
    FinalizeSale {
        asset_id: u64,
    },
}

/// Gateway to the escrow program over Solana RPC. A fresh client is created
/// per call on the blocking pool; the operator keypair signs and every
/// mutation is send-and-confirm, so a success return means the state change
/// was observed committed.
pub struct SolanaLedger {
    rpc_url: String,
    program_id: Pubkey,
    payer_bytes: Vec<u8>,
    deadline: Duration,
}

impl SolanaLedger {
    pub fn new(
        rpc_url: &str,
        program_id: &str,
        signer_key: &str,
        deadline: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let program_id = Pubkey::from_str(program_id)?;
        let payer_bytes = bs58::decode(signer_key).into_vec()?;
        Keypair::from_bytes(&payer_bytes).map_err(|e| format!("invalid LEDGER_SIGNER_KEY: {}", e))?;
        Ok(Self {
            rpc_url: rpc_url.to_string(),
            program_id,
            payer_bytes,
            deadline,
        })
    }

    fn sale_pda(&self, asset: AssetId) -> Pubkey {
        Pubkey::find_program_address(&[b"sale", &asset.to_le_bytes()], &self.program_id).0
    }

    async fn with_rpc<T, F>(&self, job: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&RpcClient) -> Result<T, LedgerError> + Send + 'static,
    {
        let url = self.rpc_url.clone();
        let task = tokio::task::spawn_blocking(move || {
            let rpc = RpcClient::new_with_commitment(url, CommitmentConfig::confirmed());
            job(&rpc)
        });
        match tokio::time::timeout(self.deadline, task).await {
            Err(_) => Err(LedgerError::Timeout),
            Ok(Err(join)) => Err(LedgerError::Unavailable(format!("blocking task: {}", join))),
            Ok(Ok(result)) => result,
        }
    }

    async fn read_account(&self, asset: AssetId) -> Result<Option<SaleAccountData>, LedgerError> {
        let pda = self.sale_pda(asset);
        self.with_rpc(move |rpc| {
            let response = rpc
                .get_account_with_commitment(&pda, CommitmentConfig::confirmed())
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            match response.value {
                None => Ok(None),
                Some(account) => SaleAccountData::try_from_slice(&account.data)
                    .map(Some)
                    .map_err(|e| {
                        LedgerError::Rejected(format!("undecodable sale account: {}", e))
                    }),
            }
        })
        .await
    }

    async fn send(
        &self,
        instruction: EscrowInstruction,
        accounts: Vec<AccountMeta>,
    ) -> Result<(), LedgerError> {
        let data = borsh::to_vec(&instruction)
            .map_err(|e| LedgerError::Rejected(format!("encode instruction: {}", e)))?;
        let program_id = self.program_id;
        let payer_bytes = self.payer_bytes.clone();
        self.with_rpc(move |rpc| {
            let payer = Keypair::from_bytes(&payer_bytes)
                .map_err(|e| LedgerError::Rejected(format!("invalid signer key: {}", e)))?;
            let ix = Instruction {
                program_id,
                accounts,
                data,
            };
            let blockhash = rpc
                .get_latest_blockhash()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            let tx = Transaction::new_signed_with_payer(
                &[ix],
                Some(&payer.pubkey()),
                &[&payer],
                blockhash,
            );
            rpc.send_and_confirm_transaction(&tx)
                .map(|_| ())
                .map_err(classify_client_error)
        })
        .await
    }
}

fn classify_client_error(err: ClientError) -> LedgerError {
    if matches!(err.kind, ClientErrorKind::TransactionError(_)) {
        LedgerError::Rejected(err.to_string())
    } else {
        LedgerError::Unavailable(err.to_string())
    }
}

fn parse_wallet(wallet: &str) -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(wallet)
        .map_err(|_| LedgerError::Rejected(format!("invalid wallet address: {}", wallet)))
}

fn lamports(value: Decimal) -> Result<u64, LedgerError> {
    (value * Decimal::from(LAMPORTS_PER_UNIT))
        .trunc()
        .to_u64()
        .ok_or_else(|| LedgerError::Rejected(format!("amount {} out of range", value)))
}

#[async_trait]
impl LedgerGateway for SolanaLedger {
    async fn listed(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self.read_account(asset).await?.is_some())
    }

    async fn buyer(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read_account(asset).await?.and_then(|a| a.buyer))
    }

    async fn inspector(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read_account(asset).await?.map(|a| a.inspector))
    }

    async fn inspection_passed(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self
            .read_account(asset)
            .await?
            .map(|a| a.inspection_passed)
            .unwrap_or(false))
    }

    async fn approval(&self, asset: AssetId, wallet: &str) -> Result<bool, LedgerError> {
        Ok(self
            .read_account(asset)
            .await?
            .map(|a| {
                a.approvals
                    .iter()
                    .any(|(w, approved)| *approved && w.eq_ignore_ascii_case(wallet))
            })
            .unwrap_or(false))
    }

    async fn holder(&self, asset: AssetId) -> Result<Option<String>, LedgerError> {
        Ok(self.read_account(asset).await?.map(|a| a.holder))
    }

    async fn finalized(&self, asset: AssetId) -> Result<bool, LedgerError> {
        Ok(self
            .read_account(asset)
            .await?
            .map(|a| a.finalized)
            .unwrap_or(false))
    }

    async fn list_asset(
        &self,
        asset: AssetId,
        owner: &str,
        inspector: &str,
    ) -> Result<(), LedgerError> {
        let owner_key = parse_wallet(owner)?;
        let accounts = vec![
            AccountMeta::new(self.sale_pda(asset), false),
            AccountMeta::new_readonly(owner_key, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ];
        self.send(
            EscrowInstruction::ListAsset {
                asset_id: asset,
                owner: owner.to_string(),
                inspector: inspector.to_string(),
            },
            accounts,
        )
        .await
    }

    async fn deposit_earnest(
        &self,
        asset: AssetId,
        value: Decimal,
        caller: &str,
    ) -> Result<(), LedgerError> {
        let caller_key = parse_wallet(caller)?;
        let accounts = vec![
            AccountMeta::new(self.sale_pda(asset), false),
            AccountMeta::new(caller_key, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ];
        self.send(
            EscrowInstruction::DepositEarnest {
                asset_id: asset,
                lamports: lamports(value)?,
            },
            accounts,
        )
        .await
    }

    async fn update_inspection_status(
        &self,
        asset: AssetId,
        passed: bool,
        caller: &str,
    ) -> Result<(), LedgerError> {
        let caller_key = parse_wallet(caller)?;
        let accounts = vec![
            AccountMeta::new(self.sale_pda(asset), false),
            AccountMeta::new_readonly(caller_key, false),
        ];
        self.send(
            EscrowInstruction::UpdateInspection {
                asset_id: asset,
                passed,
            },
            accounts,
        )
        .await
    }

    async fn approve_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
        let caller_key = parse_wallet(caller)?;
        let accounts = vec![
            AccountMeta::new(self.sale_pda(asset), false),
            AccountMeta::new_readonly(caller_key, false),
        ];
        self.send(EscrowInstruction::ApproveSale { asset_id: asset }, accounts)
            .await
    }

    async fn finalize_sale(&self, asset: AssetId, caller: &str) -> Result<(), LedgerError> {
        let caller_key = parse_wallet(caller)?;
        let accounts = vec![
            AccountMeta::new(self.sale_pda(asset), false),
            AccountMeta::new_readonly(caller_key, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ];
        self.send(EscrowInstruction::FinalizeSale { asset_id: asset }, accounts)
            .await
    }
}
