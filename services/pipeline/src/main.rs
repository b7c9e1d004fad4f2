// pipeline: Reads HL7-shaped admission/discharge/lab-result events over MLLP,
// maintains the per-patient feature store, and pages on a positive AKI
// prediction.

use pipeline::inference::ArtifactPredictor;
use pipeline::pager::PagerClient;
use pipeline::{bootstrap, config, metrics, orchestrator};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "pipeline starting");

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = metrics::init(cfg.prometheus_port) {
        eprintln!("FATAL: failed to start metrics exporter: {e}");
        std::process::exit(1);
    }
    info!(port = cfg.prometheus_port, "metrics exporter listening");

    let predictor = match ArtifactPredictor::load(&cfg.predictor_path) {
        Ok(predictor) => predictor,
        Err(e) => {
            eprintln!("FATAL: failed to load predictor artifact: {e}");
            std::process::exit(1);
        }
    };

    let store = match aki_store::Store::open(&cfg.database_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: failed to open feature store: {e}");
            std::process::exit(1);
        }
    };

    if let Some(csv_path) = &cfg.bootstrap_csv {
        match bootstrap::run(&store, csv_path) {
            Ok(imported) => info!(imported, "bootstrap import finished"),
            Err(e) => {
                eprintln!("FATAL: bootstrap import failed: {e}");
                std::process::exit(1);
            }
        }
    }

    let pager = PagerClient::new(&cfg.pager_address);
    let mut orchestrator = orchestrator::Orchestrator::new(cfg.mllp_address.clone(), store, predictor, pager);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        metrics::SIGTERM_COUNTER.with_label_values(&["pipeline"]).inc();
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await;
    info!("pipeline shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
