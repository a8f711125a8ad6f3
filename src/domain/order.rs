//! The order aggregate: lifecycle status, location groups and ledger.

use crate::domain::{
    Address, CustomerId, Decimal, ExemptionCertificate, Item, ItemId, ItemKind, LocationId,
    OrderId,
};
use crate::engine::{Partition, PlannedLine, TaxLedger};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Lifecycle status of an order at the tax service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingCapture,
    Captured,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingCapture => "pending_capture",
            OrderStatus::Captured => "captured",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_capture" => Some(OrderStatus::PendingCapture),
            "captured" => Some(OrderStatus::Captured),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a location group's lookup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLine {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub position: u32,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tic: Option<String>,
}

impl From<&PlannedLine> for GroupLine {
    fn from(line: &PlannedLine) -> Self {
        GroupLine {
            item_id: line.item.id.clone(),
            kind: line.item.kind,
            position: line.position,
            quantity: line.item.quantity,
            unit_price: line.item.unit_price,
            tic: line.item.tic.clone(),
        }
    }
}

impl GroupLine {
    /// Rebuild the routing input this line came from.
    pub fn to_item(&self, location_id: &LocationId) -> Item {
        let mut item = Item::new(self.item_id.clone(), self.kind, self.quantity, self.unit_price);
        item.tic = self.tic.clone();
        if self.kind == ItemKind::Merchandise {
            item.candidate_locations = vec![location_id.clone()];
        }
        item
    }
}

/// Items shipped from one origin location (a "sub-order").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationGroup {
    pub location_id: LocationId,
    /// Assigned by the tax service on the first successful lookup.
    pub cart_id: Option<String>,
    /// Minted locally once and reused for capture and returns.
    pub external_order_id: String,
    pub lines: Vec<GroupLine>,
}

impl LocationGroup {
    pub fn new(location_id: LocationId) -> Self {
        LocationGroup {
            location_id,
            cart_id: None,
            external_order_id: uuid::Uuid::new_v4().simple().to_string(),
            lines: Vec::new(),
        }
    }

    pub fn line_at(&self, position: u32) -> Option<&GroupLine> {
        self.lines.iter().find(|l| l.position == position)
    }

    pub fn line_for(&self, item_id: &ItemId) -> Option<&GroupLine> {
        self.lines.iter().find(|l| &l.item_id == item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub exemption: Option<ExemptionCertificate>,
    /// Destination used by the most recent lookup.
    pub destination: Option<Address>,
    pub groups: Vec<LocationGroup>,
    pub ledger: TaxLedger,
}

impl Order {
    pub fn new(id: OrderId, customer_id: CustomerId) -> Self {
        Order {
            id,
            customer_id,
            status: OrderStatus::PendingCapture,
            exemption: None,
            destination: None,
            groups: Vec::new(),
            ledger: TaxLedger::new(),
        }
    }

    pub fn group(&self, location_id: &LocationId) -> Option<&LocationGroup> {
        self.groups.iter().find(|g| &g.location_id == location_id)
    }

    /// Replace the grouping with a fresh partition.
    ///
    /// Groups whose location survives keep their cart id and external order
    /// id; the tax service treats the cart id as a session, so regenerating
    /// it would turn a correction into a second computation. The ledger's
    /// position records are rebuilt to match the new lines.
    pub fn adopt_partition(&mut self, partition: &Partition) {
        let mut previous: HashMap<LocationId, LocationGroup> = self
            .groups
            .drain(..)
            .map(|g| (g.location_id.clone(), g))
            .collect();

        self.groups = partition
            .groups
            .iter()
            .map(|planned| {
                let mut group = previous
                    .remove(&planned.location_id)
                    .unwrap_or_else(|| LocationGroup::new(planned.location_id.clone()));
                group.lines = planned.lines.iter().map(GroupLine::from).collect();
                group
            })
            .collect();

        for dropped in previous.keys() {
            debug!(order_id = %self.id, location = %dropped, "Dropping location group no longer used");
        }

        for group in &self.groups {
            for line in &group.lines {
                self.ledger.record(
                    line.item_id.clone(),
                    line.kind,
                    group.location_id.clone(),
                    line.position,
                    line.quantity,
                );
            }
        }
        let current: HashSet<ItemId> = self
            .groups
            .iter()
            .flat_map(|g| g.lines.iter().map(|l| l.item_id.clone()))
            .collect();
        self.ledger.retain_items(&current);
    }

    /// Tax currently applied to each item, in group/position order.
    pub fn item_taxes(&self) -> Vec<(ItemId, Decimal)> {
        self.groups
            .iter()
            .flat_map(|g| g.lines.iter())
            .map(|l| (l.item_id.clone(), self.ledger.tax_of(&l.item_id)))
            .collect()
    }

    /// Every line of the order rebuilt as routing input, in group order.
    pub fn recorded_items(&self) -> Vec<Item> {
        self.groups
            .iter()
            .flat_map(|g| g.lines.iter().map(move |l| l.to_item(&g.location_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Item, OriginLocation};
    use crate::engine::LocationRouter;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn locations() -> Vec<OriginLocation> {
        vec![
            OriginLocation::new("A", Address::new("1 A St", "", "Seattle", "WA", "98101")),
            OriginLocation::new("B", Address::new("1 B St", "", "Portland", "OR", "97201")),
        ]
    }

    fn order() -> Order {
        Order::new(OrderId::new("1001"), CustomerId::new("cust-1"))
    }

    #[test]
    fn test_status_names_roundtrip() {
        for status in [
            OrderStatus::PendingCapture,
            OrderStatus::Captured,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_adopt_partition_reuses_ids_for_same_location() {
        let router = LocationRouter::new();
        let items = vec![
            Item::merchandise("m1", d("1"), d("10")).with_candidates(["A"]),
            Item::merchandise("m2", d("1"), d("10")).with_candidates(["B"]),
        ];
        let mut order = order();
        order.adopt_partition(&router.partition(&items, "WA", &locations()).unwrap());
        order.groups[0].cart_id = Some("cart-a".to_string());
        let ext_a = order.groups[0].external_order_id.clone();
        let ext_b = order.groups[1].external_order_id.clone();

        // B disappears, A stays.
        let items = vec![Item::merchandise("m1", d("2"), d("10")).with_candidates(["A"])];
        order.adopt_partition(&router.partition(&items, "WA", &locations()).unwrap());

        assert_eq!(order.groups.len(), 1);
        assert_eq!(order.groups[0].cart_id.as_deref(), Some("cart-a"));
        assert_eq!(order.groups[0].external_order_id, ext_a);
        assert_ne!(order.groups[0].external_order_id, ext_b);
        assert_eq!(order.groups[0].lines[0].quantity, d("2"));
    }

    #[test]
    fn test_adopt_partition_records_positions() {
        let items = vec![
            Item::merchandise("m1", d("1"), d("10")).with_candidates(["B"]),
            Item::shipping("ship", d("4")),
        ];
        let mut order = order();
        order.adopt_partition(&LocationRouter::new().partition(&items, "WA", &locations()).unwrap());

        assert_eq!(
            order.ledger.position_of(&ItemId::new("ship")),
            Some((&LocationId::new("B"), 1))
        );
    }

    #[test]
    fn test_recorded_items_pin_merchandise_to_group() {
        let items = vec![
            Item::merchandise("m1", d("1"), d("10")).with_candidates(["A", "B"]),
            Item::fee("fee", d("1")),
        ];
        let mut order = order();
        order.adopt_partition(&LocationRouter::new().partition(&items, "OR", &locations()).unwrap());

        let recorded = order.recorded_items();
        assert_eq!(recorded[0].candidate_locations, vec![LocationId::new("B")]);
        assert!(recorded[1].candidate_locations.is_empty());
    }

    #[test]
    fn test_adopt_partition_after_rekey_keeps_ledger_entry() {
        let router = LocationRouter::new();
        let items = vec![
            Item::merchandise("item1", d("2"), d("10")).with_candidates(["A"]),
            Item::merchandise("gone", d("1"), d("10")).with_candidates(["A"]),
        ];
        let mut order = order();
        order.adopt_partition(&router.partition(&items, "WA", &locations()).unwrap());
        order.ledger.apply(&ItemId::new("item1"), d("2.00"));
        order.ledger.apply(&ItemId::new("gone"), d("1.00"));
        order
            .ledger
            .link_alias(ItemId::new("line-42"), ItemId::new("item1"));

        let items = vec![Item::merchandise("line-42", d("2"), d("10")).with_candidates(["A"])];
        order.adopt_partition(&router.partition(&items, "WA", &locations()).unwrap());

        assert_eq!(order.ledger.tax_of(&ItemId::new("line-42")), d("2.00"));
        assert!(order.ledger.entry(&ItemId::new("item1")).is_none());
        assert!(order.ledger.tax_of(&ItemId::new("gone")).is_zero());
        assert_eq!(order.ledger.cart_tax(), d("2.00"));
        assert_eq!(order.ledger.aliases().count(), 0);
    }
}
