//! Location routing: assign every item to exactly one origin location.
//!
//! Merchandise picks its own origin; fees and shipping follow the anchor
//! (the location of the first merchandise item). Output groups keep the
//! insertion order of distinct locations so repeated recalculations of the
//! same cart produce the same grouping.

use crate::domain::{default_location, Item, ItemKind, LocationId, OriginLocation};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("fee or shipping item {0} has no merchandise to anchor to")]
    NoAnchor(String),
    #[error("no origin locations configured")]
    NoLocations,
    #[error("item {0} appears more than once in the cart")]
    DuplicateItem(String),
}

/// Hook allowing a collaborator (e.g. a marketplace integration) to re-route
/// a merchandise item after the built-in choice has been made.
pub trait LocationOverride: Send + Sync {
    fn choose(&self, item: &Item, destination_state: &str, chosen: LocationId) -> LocationId;
}

/// Keeps the router's own choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepChoice;

impl LocationOverride for KeepChoice {
    fn choose(&self, _item: &Item, _destination_state: &str, chosen: LocationId) -> LocationId {
        chosen
    }
}

/// Decides which items take part in a lookup at all.
pub trait LineFilter: Send + Sync {
    fn include(&self, item: &Item) -> bool;
}

/// Merchant fee-inclusion toggle: fees are only sent when enabled.
#[derive(Debug, Clone, Copy)]
pub struct FeeInclusion {
    pub include_fees: bool,
}

impl Default for FeeInclusion {
    fn default() -> Self {
        Self { include_fees: true }
    }
}

impl LineFilter for FeeInclusion {
    fn include(&self, item: &Item) -> bool {
        self.include_fees || item.kind != ItemKind::Fee
    }
}

/// An item with its assigned lookup position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub item: Item,
    pub position: u32,
}

/// All items routed to one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    pub location_id: LocationId,
    pub lines: Vec<PlannedLine>,
}

impl PlannedGroup {
    fn push(&mut self, item: Item) {
        let position = self.lines.len() as u32;
        self.lines.push(PlannedLine { item, position });
    }
}

/// Result of routing a cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub groups: Vec<PlannedGroup>,
    pub anchor: Option<LocationId>,
}

impl Partition {
    pub fn group(&self, location_id: &LocationId) -> Option<&PlannedGroup> {
        self.groups.iter().find(|g| &g.location_id == location_id)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub struct LocationRouter {
    overrides: Box<dyn LocationOverride>,
    filter: Box<dyn LineFilter>,
}

impl Default for LocationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationRouter {
    pub fn new() -> Self {
        Self {
            overrides: Box::new(KeepChoice),
            filter: Box::new(FeeInclusion::default()),
        }
    }

    pub fn with_override(mut self, overrides: impl LocationOverride + 'static) -> Self {
        self.overrides = Box::new(overrides);
        self
    }

    pub fn with_filter(mut self, filter: impl LineFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    /// Split `items` into location groups.
    ///
    /// # Errors
    /// `DuplicateItem` when two lines share an item id; `NoLocations` when
    /// merchandise needs a default location and none is configured;
    /// `NoAnchor` when fee/shipping items arrive without any merchandise.
    pub fn partition(
        &self,
        items: &[Item],
        destination_state: &str,
        locations: &[OriginLocation],
    ) -> Result<Partition, RouterError> {
        let mut seen = HashSet::new();
        if let Some(dup) = items.iter().find(|i| !seen.insert(&i.id)) {
            return Err(RouterError::DuplicateItem(dup.id.to_string()));
        }

        let mut partition = Partition::default();
        let mut index: HashMap<LocationId, usize> = HashMap::new();
        let mut followers = Vec::new();

        for item in items.iter().filter(|i| self.filter.include(i)) {
            if item.kind.follows_anchor() {
                followers.push(item.clone());
                continue;
            }

            let chosen = self.choose_location(item, destination_state, locations)?;
            let chosen = self.overrides.choose(item, destination_state, chosen);
            debug!(item = %item.id, location = %chosen, "Routed merchandise item");

            if partition.anchor.is_none() {
                partition.anchor = Some(chosen.clone());
            }
            let slot = *index.entry(chosen.clone()).or_insert_with(|| {
                partition.groups.push(PlannedGroup {
                    location_id: chosen,
                    lines: Vec::new(),
                });
                partition.groups.len() - 1
            });
            partition.groups[slot].push(item.clone());
        }

        if followers.is_empty() {
            return Ok(partition);
        }

        let Some(anchor) = partition.anchor.clone() else {
            return Err(RouterError::NoAnchor(followers[0].id.to_string()));
        };
        let slot = index[&anchor];
        for item in followers {
            partition.groups[slot].push(item);
        }

        Ok(partition)
    }

    /// Built-in origin choice for one merchandise item.
    fn choose_location(
        &self,
        item: &Item,
        destination_state: &str,
        locations: &[OriginLocation],
    ) -> Result<LocationId, RouterError> {
        if let [only] = item.candidate_locations.as_slice() {
            return Ok(only.clone());
        }

        let in_state = item.candidate_locations.iter().find(|candidate| {
            locations
                .iter()
                .any(|l| &l.id == *candidate && l.address.same_state(destination_state))
        });
        if let Some(candidate) = in_state {
            return Ok(candidate.clone());
        }

        default_location(locations)
            .map(|l| l.id.clone())
            .ok_or(RouterError::NoLocations)
    }
}
