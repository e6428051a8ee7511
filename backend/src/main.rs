use axum::http::StatusCode;
use axum::{
    extract::{Request, State},
    middleware,
    response::Response,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod auth;
mod catalog;
mod config;
mod error;
mod handlers;
mod ledger;
mod listing;
mod models;
mod reconcile;
mod schema;

use catalog::{CatalogStore, MemoryCatalogStore, PgCatalogStore};
use ledger::{LedgerGateway, MemoryLedger, SolanaLedger};
use listing::{ListingOrchestrator, OrphanRegistry};
use reconcile::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub catalog: Arc<dyn CatalogStore>,
    pub reconciler: Arc<Reconciler>,
    pub orchestrator: Arc<ListingOrchestrator>,
    pub orphans: Arc<OrphanRegistry>,
}

async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: middleware::Next,
) -> Result<Response, (StatusCode, String)> {
    let auth_header = request.headers().get("Authorization").ok_or((
        StatusCode::UNAUTHORIZED,
        "Missing Authorization header".to_string(),
    ))?;
    let token = auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format".to_string(),
        ))?;
    let user = auth::validate_token(token, &state.config.jwt_secret).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token".to_string(),
        )
    })?;
    log::info!("authenticated wallet {} ({})", user.wallet, user.role.as_str());
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = config::AppConfig::load()?;
    log::info!(
        "catalog backend {:?}, ledger backend {:?}",
        config.catalog_backend,
        config.ledger_backend
    );

    let catalog: Arc<dyn CatalogStore> = match config.catalog_backend {
        config::CatalogBackend::Memory => Arc::new(MemoryCatalogStore::new()),
        config::CatalogBackend::Postgres => {
            let database_url = config
                .database_url
                .clone()
                .ok_or("DATABASE_URL is not set")?;
            Arc::new(PgCatalogStore::new(database_url, config.uploads_dir.clone()))
        }
    };

    let ledger: Arc<dyn LedgerGateway> = match config.ledger_backend {
        config::LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        config::LedgerBackend::Solana => {
            let program_id = config.program_id.clone().ok_or("PROGRAM_ID is not set")?;
            let signer_key = config
                .ledger_signer_key
                .clone()
                .ok_or("LEDGER_SIGNER_KEY is not set")?;
            Arc::new(SolanaLedger::new(
                &config.solana_rpc_url,
                &program_id,
                &signer_key,
                std::time::Duration::from_millis(config.call_deadline_ms),
            )?)
        }
    };

    // seed the asset id allocator above anything already linked in the catalog
    let first_asset_id = catalog
        .list()
        .await?
        .iter()
        .filter_map(|record| record.ledger_asset_id)
        .max()
        .map(|highest| highest + 1)
        .unwrap_or(1);
    log::info!("asset id allocation starts at {}", first_asset_id);

    let orphans = Arc::new(OrphanRegistry::default());
    let reconciler = Arc::new(Reconciler::new(
        catalog.clone(),
        ledger.clone(),
        orphans.clone(),
    ));
    let orchestrator = Arc::new(ListingOrchestrator::new(
        catalog.clone(),
        ledger,
        orphans.clone(),
        config.inspector_wallet.clone(),
        first_asset_id,
    ));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let state = AppState {
        config,
        catalog,
        reconciler,
        orchestrator,
        orphans,
    };

    let protected_routes = Router::new()
        .route("/properties", post(handlers::create_property))
        .route(
            "/properties/:id",
            put(handlers::update_property).delete(handlers::delete_property),
        )
        .route("/properties/:id/relist", post(handlers::relist_property))
        .route(
            "/properties/:id/deposit-earnest",
            post(handlers::deposit_earnest),
        )
        .route("/properties/:id/inspection", post(handlers::pass_inspection))
        .route("/properties/:id/approve", post(handlers::approve_sale))
        .route("/properties/:id/finalize", post(handlers::finalize_sale))
        .route("/diagnostics/orphans", get(handlers::list_orphans))
        .route(
            "/diagnostics/orphans/:id/repair",
            post(handlers::repair_orphan),
        )
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let app = Router::new()
        .route("/", get(|| async { "Hello, Estate Escrow!" }))
        .route("/login", post(handlers::login))
        .route("/properties", get(handlers::browse_properties))
        .route("/properties/:id", get(handlers::get_property))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .with_state(state);

    log::info!("Starting server on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;

    Ok(())
}
