//! Idena bridge node
//!
//! Runs the HTTP API and the reconciliation loop in one process. The API
//! only records swaps and their source transactions; every payout, failure
//! and refund is decided by the reconciler.

use std::net::SocketAddr;
use std::sync::Arc;

use eyre::WrapErr;
use idena_bridge::api::{self, AppState};
use idena_bridge::config::Config;
use idena_bridge::db::{self, PgStore, SwapStore};
use idena_bridge::evm::{BscClient, EvmLedger};
use idena_bridge::idena::{IdenaClient, IdenaLedger};
use idena_bridge::metrics;
use idena_bridge::oracle::{HttpPriceOracle, PriceOracle};
use idena_bridge::reconciler::Reconciler;
use idena_bridge::swaps::SwapService;
use tracing::{error, info};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Idena bridge");

    let config = Config::load()?;
    info!(
        idena_provider = %config.idena.provider,
        bsc_rpc = %config.bsc.rpc_url,
        bsc_chain_id = config.bsc.chain_id,
        port = config.server.port,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    db::run_migrations(&pool).await?;
    let store: Arc<dyn SwapStore> = Arc::new(PgStore::new(pool));

    let oracle: Arc<dyn PriceOracle> = Arc::new(HttpPriceOracle::new(&config.oracle)?);

    let idena = IdenaClient::new(&config.idena)?;
    idena
        .init_nonce()
        .await
        .wrap_err("Idena sequence state could not be initialized")?;
    let idena: Arc<dyn IdenaLedger> = Arc::new(idena);

    let bsc = BscClient::new(&config.bsc, oracle)?;
    bsc.init_nonce_override().await?;
    let bsc: Arc<dyn EvmLedger> = Arc::new(bsc);

    let service = Arc::new(SwapService::new(store.clone(), idena.clone(), bsc.clone()));
    let state = AppState {
        service,
        min_swap: config.server.min_swap.clone(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(addr, state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let reconciler = Reconciler::new(store, idena, bsc, config.reconciler.poll_interval());

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = reconciler.run(shutdown_rx).await;
    metrics::UP.set(0.0);

    info!("Idena bridge stopped");
    result
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,idena_bridge=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
