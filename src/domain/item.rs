//! Taxable items and merchant origin locations.

use crate::domain::{Address, Decimal, ItemId, ItemKind, LocationId};
use serde::{Deserialize, Serialize};

/// One taxable unit handed to the engine by the commerce platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Taxability code; `None` lets the service apply its default.
    pub tic: Option<String>,
    /// Candidate origin locations. Only meaningful for merchandise.
    #[serde(default)]
    pub candidate_locations: Vec<LocationId>,
}

impl Item {
    pub fn merchandise(id: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self::new(ItemId::new(id), ItemKind::Merchandise, quantity, unit_price)
    }

    pub fn fee(id: impl Into<String>, amount: Decimal) -> Self {
        Self::new(ItemId::new(id), ItemKind::Fee, Decimal::one(), amount)
    }

    pub fn shipping(id: impl Into<String>, amount: Decimal) -> Self {
        Self::new(ItemId::new(id), ItemKind::Shipping, Decimal::one(), amount)
    }

    pub fn new(id: ItemId, kind: ItemKind, quantity: Decimal, unit_price: Decimal) -> Self {
        Item {
            id,
            kind,
            quantity,
            unit_price,
            tic: None,
            candidate_locations: Vec::new(),
        }
    }

    pub fn with_tic(mut self, tic: impl Into<String>) -> Self {
        self.tic = Some(tic.into());
        self
    }

    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate_locations = candidates.into_iter().map(LocationId::new).collect();
        self
    }
}

/// A merchant warehouse or store that goods ship from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginLocation {
    pub id: LocationId,
    pub address: Address,
    #[serde(default)]
    pub is_default: bool,
}

impl OriginLocation {
    pub fn new(id: impl Into<String>, address: Address) -> Self {
        OriginLocation {
            id: LocationId::new(id),
            address,
            is_default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// The location used when no candidate matches: the one flagged as default,
/// else the first configured.
pub fn default_location(locations: &[OriginLocation]) -> Option<&OriginLocation> {
    locations
        .iter()
        .find(|l| l.is_default)
        .or_else(|| locations.first())
}
