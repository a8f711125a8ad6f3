use anyhow::Context;
use origintax::domain::{ItemId, LocationId};
use origintax::{api, config::Config, db::init_db, HttpTaxService, OriginLocation, Repository};
use origintax::TaxService;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Startup seed: origin locations and optional per-item candidates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationSeed {
    locations: Vec<OriginLocation>,
    #[serde(default)]
    item_locations: BTreeMap<String, Vec<String>>,
}

async fn seed_locations(repo: &Repository, path: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read origin locations file {}", path))?;
    let seed: LocationSeed = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid origin locations file {}", path))?;

    repo.replace_locations(&seed.locations).await?;
    for (item_id, candidates) in &seed.item_locations {
        let candidates: Vec<LocationId> = candidates.iter().map(LocationId::new).collect();
        repo.set_item_candidates(&ItemId::new(item_id.as_str()), &candidates)
            .await?;
    }

    info!(
        locations = seed.locations.len(),
        items = seed.item_locations.len(),
        "Origin locations loaded"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    if let Some(path) = &config.origin_locations_file {
        seed_locations(&repo, path).await?;
    }

    if !config.has_credentials() {
        warn!("Tax service credentials are not set; tax lookups will be refused");
    }

    let service: Arc<dyn TaxService> = Arc::new(
        HttpTaxService::from_config(&config).context("Failed to build tax service client")?,
    );

    let state = api::AppState::new(service, repo, config);
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
