pub mod addresses;
pub mod health;
pub mod orders;

use crate::collaborators::{LocationCatalog, OrderStore};
use crate::config::Config;
use crate::orchestration::{OrderLifecycle, TaxCalculator};
use crate::service::TaxService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub service: Arc<dyn TaxService>,
    pub calculator: Arc<TaxCalculator>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub config: Config,
}

impl AppState {
    /// Wire the calculator and lifecycle manager over shared collaborators.
    pub fn new<R>(service: Arc<dyn TaxService>, repo: Arc<R>, config: Config) -> Self
    where
        R: OrderStore + LocationCatalog + 'static,
    {
        let calculator = TaxCalculator::new(service.clone(), repo.clone(), repo.clone(), &config);
        let lifecycle = OrderLifecycle::new(
            service.clone(),
            repo.clone(),
            repo.clone(),
            calculator.router(),
        );
        Self {
            store: repo,
            service,
            calculator: Arc::new(calculator),
            lifecycle: Arc::new(lifecycle),
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/orders/:order_id", get(orders::get_order))
        .route("/v1/orders/:order_id/tax", post(orders::recalculate))
        .route("/v1/orders/:order_id/capture", post(orders::capture))
        .route("/v1/orders/:order_id/refund", post(orders::refund))
        .route(
            "/v1/orders/:order_id/items/:external_id/link",
            post(orders::link_item),
        )
        .route("/v1/addresses/verify", post(addresses::verify_address))
        .layer(cors)
        .with_state(state)
}
