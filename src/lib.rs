pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod service;

pub use collaborators::{LocationCatalog, OrderStore, StoreError};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, Decimal, Item, ItemKind, Order, OrderId, OrderStatus, OriginLocation};
pub use error::AppError;
pub use orchestration::{OrderLifecycle, TaxCalculator, TaxError};
pub use service::{HttpTaxService, MockTaxService, TaxService, TaxServiceError};
