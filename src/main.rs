use anyhow::Result;
use clap::Parser;
use marcus::{
    advisor::{Advisor, HttpAdvisor, NoopAdvisor},
    api::ApiServer,
    board,
    config::Config,
    coordinator::Coordinator,
    journal::Journal,
    ledger::AssignmentLedger,
    protocol,
    reconciler::{shutdown_channel, Reconciler},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = "marcus", about = "Coordination server for autonomous agents")]
struct Args {
    /// Data directory for the ledger and journal (overrides MARCUS_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Board provider: boarda, boardb, or local (overrides MARCUS_PROVIDER)
    #[arg(long)]
    provider: Option<String>,

    /// HTTP port for the control protocol (overrides MARCUS_API_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Serve the control protocol over stdio frames instead of HTTP
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(provider) = &args.provider {
        config.board.provider = provider
            .parse()
            .map_err(marcus::MarcusError::Configuration)?;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    info!(
        "starting marcus for project {} (provider {:?})",
        config.project_id, config.board.provider
    );

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let ledger = Arc::new(
        AssignmentLedger::open(config.data_dir.join(marcus::constants::LEDGER_FILE)).await?,
    );
    let journal = Arc::new(Journal::open(&config.data_dir).await?);
    let board = board::build_adapter(&config.board, &config.data_dir)?;
    let advisor: Arc<dyn Advisor> = match HttpAdvisor::new(&config.advisor)? {
        Some(advisor) => Arc::new(advisor),
        None => Arc::new(NoopAdvisor),
    };

    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        board,
        ledger,
        journal,
        advisor,
    ));

    // Startup reconciliation runs to completion before any request is
    // served.
    coordinator.reconcile().await?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let reconciler = Reconciler::new(
        coordinator.clone(),
        std::time::Duration::from_secs(config.reconciler.interval_secs),
        shutdown_rx.clone(),
    );
    let reconciler_handle = tokio::spawn(reconciler.run());

    if args.stdio {
        tokio::select! {
            result = protocol::run_stdio(coordinator.clone(), shutdown_rx) => {
                if let Err(e) = result {
                    tracing::error!("stdio transport failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
            }
        }
    } else {
        let api_server = ApiServer::new(config.api.clone(), coordinator.clone());
        tokio::select! {
            result = api_server.run(shutdown_rx) => {
                if let Err(e) = result {
                    tracing::error!("API server failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = reconciler_handle.await;
    info!("marcus stopped");
    Ok(())
}
