use std::sync::Arc;

use connhub::config::load_config;
use connhub::hub::{Hub, PubSubHandler};
use connhub::transport::{QueryParamIdentity, WebSocketServer};
use connhub::utils::HubError;
use connhub::utils::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run_server().await {
        logging::init("info", false);
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), HubError> {
    let _ = dotenvy::dotenv();
    let config = load_config()?;
    logging::init(&config.logging.level, config.logging.json);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let hub = Hub::new(config.hub.clone(), Arc::new(PubSubHandler))?;
    let resolver = Arc::new(QueryParamIdentity::new(config.server.identity_param.clone()));
    let server = WebSocketServer::bind(&addr, hub.clone(), resolver).await?;

    tokio::select! {
        _ = server.run() => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    hub.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
