//! Interfaces the tax engine consumes from the surrounding platform.
//!
//! - `LocationCatalog` - merchant origin locations and per-item candidates
//! - `OrderStore` - persisted order state
//! - `DestinationResolver` - which address an order is taxed at

use crate::config::TaxableAddress;
use crate::domain::{
    Address, ItemId, LocationGroup, LocationId, Order, OrderId, OrderStatus, OriginLocation,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    #[error("order {0} is not stored")]
    UnknownOrder(String),
}

#[async_trait]
pub trait LocationCatalog: Send + Sync {
    async fn list_origin_locations(&self) -> Result<Vec<OriginLocation>, StoreError>;

    async fn candidate_locations_for(&self, item_id: &ItemId)
        -> Result<Vec<LocationId>, StoreError>;
}

/// Persistence boundary for orders.
///
/// No locking: concurrent writers to the same order overwrite each other.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load_order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError>;

    async fn save_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn load_groups(&self, order_id: &OrderId) -> Result<Vec<LocationGroup>, StoreError>;

    async fn save_groups(
        &self,
        order_id: &OrderId,
        groups: &[LocationGroup],
    ) -> Result<(), StoreError>;

    async fn load_status(&self, order_id: &OrderId) -> Result<Option<OrderStatus>, StoreError>;

    async fn save_status(&self, order_id: &OrderId, status: OrderStatus)
        -> Result<(), StoreError>;
}

/// How the buyer receives the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Fulfillment {
    #[default]
    Shipping,
    /// Merchant's own vehicles deliver the order.
    LocalDelivery,
    /// Buyer collects in person from an origin location.
    Pickup { location_id: LocationId },
}

/// Buyer-side facts needed to pick a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutContext {
    #[serde(default)]
    pub billing: Option<Address>,
    #[serde(default)]
    pub shipping: Option<Address>,
    #[serde(default)]
    pub fulfillment: Fulfillment,
}

impl CheckoutContext {
    pub fn delivered_by_seller(&self) -> bool {
        matches!(self.fulfillment, Fulfillment::LocalDelivery)
    }
}

pub trait DestinationResolver: Send + Sync {
    fn destination_for(
        &self,
        context: &CheckoutContext,
        locations: &[OriginLocation],
    ) -> Option<Address>;
}

/// Merchant-configured destination choice.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredDestination {
    pub taxable_address: TaxableAddress,
}

impl DestinationResolver for ConfiguredDestination {
    fn destination_for(
        &self,
        context: &CheckoutContext,
        locations: &[OriginLocation],
    ) -> Option<Address> {
        if let Fulfillment::Pickup { location_id } = &context.fulfillment {
            return locations
                .iter()
                .find(|l| &l.id == location_id)
                .map(|l| l.address.clone());
        }

        let (preferred, fallback) = match self.taxable_address {
            TaxableAddress::Shipping => (&context.shipping, &context.billing),
            TaxableAddress::Billing => (&context.billing, &context.shipping),
        };
        preferred.clone().or_else(|| fallback.clone())
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticLocationCatalog {
    locations: Vec<OriginLocation>,
    candidates: HashMap<ItemId, Vec<LocationId>>,
}

impl StaticLocationCatalog {
    pub fn new(locations: Vec<OriginLocation>) -> Self {
        Self {
            locations,
            candidates: HashMap::new(),
        }
    }

    pub fn with_candidates<I, S>(mut self, item_id: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates.insert(
            ItemId::new(item_id),
            candidates.into_iter().map(LocationId::new).collect(),
        );
        self
    }
}

#[async_trait]
impl LocationCatalog for StaticLocationCatalog {
    async fn list_origin_locations(&self) -> Result<Vec<OriginLocation>, StoreError> {
        Ok(self.locations.clone())
    }

    async fn candidate_locations_for(
        &self,
        item_id: &ItemId,
    ) -> Result<Vec<LocationId>, StoreError> {
        Ok(self.candidates.get(item_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations() -> Vec<OriginLocation> {
        vec![OriginLocation::new(
            "store-1",
            Address::new("5 Market St", "", "Spokane", "WA", "99201"),
        )]
    }

    fn context(fulfillment: Fulfillment) -> CheckoutContext {
        CheckoutContext {
            billing: Some(Address::new("1 Bill Rd", "", "Austin", "TX", "78701")),
            shipping: Some(Address::new("2 Ship Ln", "", "Denver", "CO", "80202")),
            fulfillment,
        }
    }

    #[test]
    fn test_shipping_preference() {
        let resolver = ConfiguredDestination {
            taxable_address: TaxableAddress::Shipping,
        };
        let dest = resolver
            .destination_for(&context(Fulfillment::Shipping), &locations())
            .unwrap();
        assert_eq!(dest.state, "CO");
    }

    #[test]
    fn test_billing_preference_with_fallback() {
        let resolver = ConfiguredDestination {
            taxable_address: TaxableAddress::Billing,
        };
        let mut ctx = context(Fulfillment::Shipping);
        assert_eq!(resolver.destination_for(&ctx, &locations()).unwrap().state, "TX");

        ctx.billing = None;
        assert_eq!(resolver.destination_for(&ctx, &locations()).unwrap().state, "CO");
    }

    #[test]
    fn test_pickup_uses_location_address() {
        let resolver = ConfiguredDestination {
            taxable_address: TaxableAddress::Shipping,
        };
        let ctx = context(Fulfillment::Pickup {
            location_id: LocationId::new("store-1"),
        });
        assert_eq!(resolver.destination_for(&ctx, &locations()).unwrap().city, "Spokane");
        assert!(!ctx.delivered_by_seller());

        let unknown = context(Fulfillment::Pickup {
            location_id: LocationId::new("nowhere"),
        });
        assert_eq!(resolver.destination_for(&unknown, &locations()), None);
    }

    #[test]
    fn test_only_local_delivery_is_delivered_by_seller() {
        assert!(context(Fulfillment::LocalDelivery).delivered_by_seller());
        assert!(!context(Fulfillment::Shipping).delivered_by_seller());
    }

    #[tokio::test]
    async fn test_static_catalog() {
        let catalog = StaticLocationCatalog::new(locations()).with_candidates("sku-1", ["store-1"]);
        assert_eq!(catalog.list_origin_locations().await.unwrap().len(), 1);
        assert_eq!(
            catalog
                .candidate_locations_for(&ItemId::new("sku-1"))
                .await
                .unwrap(),
            vec![LocationId::new("store-1")]
        );
        assert!(catalog
            .candidate_locations_for(&ItemId::new("other"))
            .await
            .unwrap()
            .is_empty());
    }
}
