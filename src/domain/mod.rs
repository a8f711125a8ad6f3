//! Domain types for location-partitioned tax calculation.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Identifier newtypes and item kinds
//! - Postal addresses, items and origin locations
//! - Exemption certificates
//! - The order aggregate with its location groups

pub mod address;
pub mod decimal;
pub mod exemption;
pub mod item;
pub mod order;
pub mod primitives;

pub use address::Address;
pub use decimal::Decimal;
pub use exemption::{ExemptionCertificate, PurchaserTaxId};
pub use item::{default_location, Item, OriginLocation};
pub use order::{GroupLine, LocationGroup, Order, OrderStatus};
pub use primitives::{CustomerId, ItemId, ItemKind, LocationId, OrderId};
