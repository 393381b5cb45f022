mod agents;
mod config;
mod errors;
mod extraction;
mod models;
mod orchestrator;
mod providers;
mod server;
mod util;
mod validation;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

use crate::{
    agents::AgentRegistry,
    errors::Result,
    orchestrator::Decorator,
    util::{UploadStore, format_local, now_local},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = config::AppConfig::load()?;

    let registry = Arc::new(AgentRegistry::from_config(&config)?);
    for (role, model) in registry.overview() {
        info!(target: "agent", %role, model, "agent ready");
    }

    let uploads = UploadStore::new(config.server.uploads_dir.clone()).await?;
    info!(target: "uploads", dir = ?uploads.root(), "upload directory ready");

    let decorator = Arc::new(Decorator::new(registry, uploads, config.pipeline));

    server::run_server(
        config.server.bind_addr,
        decorator,
        config.server.max_upload_bytes,
    )
    .await
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_timer(LocalTimer)
        .init();

    info!("tracing initialized");
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = now_local();
        write!(w, "{}", format_local(&now, "%Y-%m-%d %H:%M:%S%:z"))
    }
}
