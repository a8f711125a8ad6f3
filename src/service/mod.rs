//! Remote tax service abstraction.
//!
//! The engine only ever talks to the service through [`TaxService`]; the
//! HTTP client and the in-memory mock are interchangeable behind it.

use crate::domain::{Address, CustomerId, Decimal, ExemptionCertificate, ItemId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod mock;

pub use http::HttpTaxService;
pub use mock::{MockTaxService, RecordedCall};

/// One line of a lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub index: u32,
    pub item_id: ItemId,
    pub tic: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub customer_id: CustomerId,
    /// Empty on the first lookup of a location group.
    pub cart_id: String,
    pub lines: Vec<CartLine>,
    pub origin: Address,
    pub destination: Address,
    pub delivered_by_seller: bool,
    pub exemption: Option<ExemptionCertificate>,
}

/// Tax reported for one request line, keyed by its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTax {
    pub index: u32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    pub cart_id: String,
    pub lines: Vec<LineTax>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub cart_id: String,
    pub customer_id: CustomerId,
    pub order_id: String,
    pub date_authorized: DateTime<Utc>,
    pub date_captured: DateTime<Utc>,
}

/// A line being returned. `price` is always a positive magnitude.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnLine {
    pub index: u32,
    pub item_id: ItemId,
    pub tic: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    pub order_id: String,
    pub returned_date: DateTime<Utc>,
    /// `None` returns the whole order.
    pub lines: Option<Vec<ReturnLine>>,
}

#[async_trait]
pub trait TaxService: Send + Sync + fmt::Debug {
    /// Compute tax for one location group's cart.
    async fn lookup(&self, request: LookupRequest) -> Result<LookupResponse, TaxServiceError>;

    /// Commit a previously looked-up cart as a captured order.
    async fn authorized_with_capture(&self, request: CaptureRequest)
        -> Result<(), TaxServiceError>;

    /// Reverse some or all of a captured order.
    async fn returned(&self, request: ReturnRequest) -> Result<(), TaxServiceError>;

    /// Normalize a postal address.
    async fn verify_address(&self, address: &Address) -> Result<Address, TaxServiceError>;

    /// Check connectivity and credentials.
    async fn ping(&self) -> Result<(), TaxServiceError>;
}

/// Everything that can go wrong talking to the tax service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxServiceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    /// The service answered but refused the request.
    #[error("tax service rejected request: {}", .messages.join("; "))]
    Rejected { messages: Vec<String> },
}

impl TaxServiceError {
    pub fn rejected(message: impl Into<String>) -> Self {
        TaxServiceError::Rejected {
            messages: vec![message.into()],
        }
    }

    /// Faults worth retrying for idempotent read-only calls.
    pub fn is_transient(&self) -> bool {
        match self {
            TaxServiceError::Network(_) | TaxServiceError::Timeout => true,
            TaxServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            TaxServiceError::Parse(_) | TaxServiceError::Rejected { .. } => false,
        }
    }
}
