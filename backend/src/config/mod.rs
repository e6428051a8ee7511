use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatalogBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Solana,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    pub catalog_backend: CatalogBackend,
    pub database_url: Option<String>,
    pub ledger_backend: LedgerBackend,
    pub solana_rpc_url: String,
    pub program_id: Option<String>,
    pub ledger_signer_key: Option<String>,
    pub inspector_wallet: String,
    pub call_deadline_ms: u64,
    pub uploads_dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // Load .env file if present

        let catalog_backend = match env::var("CATALOG_BACKEND").as_deref() {
            Ok("postgres") => CatalogBackend::Postgres,
            Ok("memory") | Err(_) => CatalogBackend::Memory,
            Ok(other) => return Err(format!("unknown CATALOG_BACKEND: {}", other).into()),
        };
        let ledger_backend = match env::var("LEDGER_BACKEND").as_deref() {
            Ok("solana") => LedgerBackend::Solana,
            Ok("memory") | Err(_) => LedgerBackend::Memory,
            Ok(other) => return Err(format!("unknown LEDGER_BACKEND: {}", other).into()),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if catalog_backend == CatalogBackend::Postgres && database_url.is_none() {
            return Err("DATABASE_URL is required for the postgres catalog backend".into());
        }

        let program_id = env::var("PROGRAM_ID").ok();
        let ledger_signer_key = env::var("LEDGER_SIGNER_KEY").ok();
        if ledger_backend == LedgerBackend::Solana
            && (program_id.is_none() || ledger_signer_key.is_none())
        {
            return Err(
                "PROGRAM_ID and LEDGER_SIGNER_KEY are required for the solana ledger backend"
                    .into(),
            );
        }

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            jwt_secret: env::var("JWT_SECRET")?,
            catalog_backend,
            database_url,
            ledger_backend,
            solana_rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.devnet.solana.com".to_string()),
            program_id,
            ledger_signer_key,
            inspector_wallet: env::var("INSPECTOR_WALLET")?,
            call_deadline_ms: env::var("CALL_DEADLINE_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            uploads_dir: PathBuf::from(
                env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()),
            ),
        })
    }
}
