use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod auth;
mod error;
mod extract;
mod handlers;
mod routes;
mod state;

use skyhaul_core::{logging, Config};
use state::AppState;

/// Optional TOML file; `SKYHAUL_*` variables still override it
const CONFIG_PATH_ENV: &str = "SKYHAUL_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    logging::init_from(&config.logging);

    let state = Arc::new(AppState::new(config.clone())?);
    let app = routes::app(state);

    let bind_addr = config.listen_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        database = %config.database.path,
        "Dispatch API listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
