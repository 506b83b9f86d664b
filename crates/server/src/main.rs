mod app_state;
mod auth;
mod errors;
mod handlers;
mod models;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use feedgate_core::app::context::AppContext;
use feedgate_core::infra::bootstrap::build_adapters;
use feedgate_core::infra::clock::SystemClock;
use feedgate_core::infra::config::ConfigLoader;
use feedgate_core::infra::database;
use feedgate_core::infra::logging::{BootError, init_logging};
use feedgate_core::infra::memory::DiscardPublisher;
use feedgate_core::infra::reqwest_http::ReqwestHttp;
use feedgate_core::ports::ledger::Ledger;

use app_state::{AppState, ServerContext};

#[tokio::main]
async fn main() -> Result<(), BootError> {
    let config_path = pick_config_path();
    let cfg = ConfigLoader::load(&config_path)
        .await
        .map_err(|e| BootError::Fatal(e.to_string()))?;

    init_logging(&cfg.log_level);
    info!(
        config = %config_path.display(),
        db = %database::describe(&cfg),
        mode = ?cfg.mode,
        api_key_required = cfg.server.api_key.is_some(),
        "Loaded config"
    );

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| BootError::Fatal(format!("invalid http bind: {e}")))?;

    let ledger = database::create_ledger(&cfg)
        .await
        .map_err(|e| BootError::Fatal(e.to_string()))?;
    ledger
        .migrate()
        .await
        .map_err(|e| BootError::Fatal(e.to_string()))?;

    let adapters = build_adapters(&cfg)
        .await
        .map_err(|e| BootError::Fatal(e.to_string()))?;
    let http = ReqwestHttp::new(&cfg.fetch).map_err(|e| BootError::Fatal(e.to_string()))?;

    let ctx: ServerContext = AppContext {
        cfg: Arc::new(cfg),
        ledger,
        http: Arc::new(http),
        clock: Arc::new(SystemClock),
        gate: adapters.gate,
        responses: adapters.responses,
        // Manual fetches never announce results.
        events: Arc::new(DiscardPublisher),
    };

    let app = handlers::router(AppState::new(ctx));

    info!(%addr, "Query API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BootError::Fatal(format!("bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BootError::Fatal(format!("http server error: {e}")))?;

    Ok(())
}

fn pick_config_path() -> PathBuf {
    if let Some(p) = std::env::args().nth(1) {
        return PathBuf::from(p);
    }

    for var in ["SERVER_CONFIG_PATH", "CONFIG_PATH"] {
        if let Ok(p) = std::env::var(var)
            && !p.trim().is_empty()
        {
            return PathBuf::from(p);
        }
    }

    let candidates = [
        PathBuf::from("crates/fetcher/res/config.toml"),
        PathBuf::from("../fetcher/res/config.toml"),
    ];
    for p in &candidates {
        if p.exists() {
            return p.clone();
        }
    }
    candidates[0].clone()
}
