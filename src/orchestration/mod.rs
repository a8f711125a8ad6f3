//! Control flow that drives the engine against the tax service and the
//! persistence collaborators.

pub mod calculator;
pub mod lifecycle;
pub mod lookup;

pub use calculator::{RecalculateRequest, TaxCalculator};
pub use lifecycle::{OrderLifecycle, PartialRefundSummary, RefundLine};
pub use lookup::{GroupSummary, ItemTax, LookupOrchestrator, LookupSummary};

use crate::collaborators::StoreError;
use crate::domain::OrderStatus;
use crate::engine::RouterError;
use crate::service::TaxServiceError;
use thiserror::Error;

/// The merchant's setup does not allow a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("tax service credentials are not configured")]
    MissingCredentials,
    #[error("no origin locations are configured")]
    NoOriginLocations,
    #[error("order has no destination address")]
    MissingDestination,
    #[error("destination state {0} is outside the taxable area")]
    NonDomesticDestination(String),
    #[error("location group {0} has no configured origin address")]
    UnknownOriginLocation(String),
}

#[derive(Debug, Error)]
pub enum TaxError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Service(#[from] TaxServiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("order {0} not found")]
    OrderNotFound(String),
    #[error("cannot {op} an order that is {from}")]
    InvalidTransition { from: OrderStatus, op: &'static str },
    #[error("location group {location} was never looked up")]
    NotLookedUp { location: String },
}
