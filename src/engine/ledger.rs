//! Per-item tax ledger for one order.
//!
//! Holds the tax currently applied to each item, the order-level cart and
//! shipping totals, and a durable record of where every item sat in the
//! last lookup (location + position). Refunds resolve items through this
//! record instead of re-deriving the routing decision.

use crate::domain::{Decimal, ItemId, ItemKind, LocationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Upper bound on alias chain length when resolving re-keyed items.
const MAX_ALIAS_HOPS: usize = 8;

/// Ledger state for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: ItemKind,
    pub location_id: LocationId,
    pub position: u32,
    pub quantity: Decimal,
    pub tax: Decimal,
    /// Units already returned through partial refunds.
    #[serde(default)]
    pub refunded: Decimal,
}

impl LedgerEntry {
    /// Units still open for refund.
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.refunded).floor_zero()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxLedger {
    entries: BTreeMap<ItemId, LedgerEntry>,
    /// External id -> internal (lookup-time) id.
    aliases: BTreeMap<ItemId, ItemId>,
    cart_tax: Decimal,
    shipping_tax: Decimal,
}

impl TaxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted parts. Totals are derived from the
    /// entries so the sum invariant holds by construction.
    pub fn from_parts(
        entries: impl IntoIterator<Item = (ItemId, LedgerEntry)>,
        aliases: impl IntoIterator<Item = (ItemId, ItemId)>,
    ) -> Self {
        let mut ledger = TaxLedger {
            entries: entries.into_iter().collect(),
            aliases: aliases.into_iter().collect(),
            cart_tax: Decimal::zero(),
            shipping_tax: Decimal::zero(),
        };
        ledger.recompute_totals();
        ledger
    }

    fn recompute_totals(&mut self) {
        self.cart_tax = Decimal::zero();
        self.shipping_tax = Decimal::zero();
        for entry in self.entries.values() {
            match entry.kind {
                ItemKind::Shipping => self.shipping_tax += entry.tax,
                _ => self.cart_tax += entry.tax,
            }
        }
    }

    /// Zero every item's tax and both totals. Position records survive.
    pub fn reset(&mut self) {
        for entry in self.entries.values_mut() {
            entry.tax = Decimal::zero();
        }
        self.cart_tax = Decimal::zero();
        self.shipping_tax = Decimal::zero();
    }

    /// Drop the records of items outside `keep`, together with their tax.
    pub fn retain_items(&mut self, keep: &HashSet<ItemId>) {
        self.entries.retain(|id, _| keep.contains(id));
        self.recompute_totals();
    }

    /// Remember where an item sits in its location group.
    ///
    /// Recording an id directly retires any alias it carried. When that alias
    /// pointed at a tracked item, the entry moves to the new id with its tax
    /// and refund tally, and other aliases of the old id follow it.
    pub fn record(
        &mut self,
        item_id: ItemId,
        kind: ItemKind,
        location_id: LocationId,
        position: u32,
        quantity: Decimal,
    ) {
        let mut previous = self.entries.remove(&item_id);
        if let Some(internal) = self.aliases.remove(&item_id) {
            if previous.is_none() {
                previous = self.entries.remove(&internal);
                if previous.is_some() {
                    for target in self.aliases.values_mut() {
                        if *target == internal {
                            *target = item_id.clone();
                        }
                    }
                }
            }
        }

        let (tax, refunded) = previous
            .map(|e| (e.tax, e.refunded))
            .unwrap_or_default();
        self.entries.insert(
            item_id,
            LedgerEntry {
                kind,
                location_id,
                position,
                quantity,
                tax,
                refunded,
            },
        );
        self.recompute_totals();
    }

    /// Add `amount` to an item's tax, flooring the item at zero.
    ///
    /// Returns the change actually applied, or `None` when the item is not
    /// in the ledger.
    pub fn apply(&mut self, item_id: &ItemId, amount: Decimal) -> Option<Decimal> {
        let resolved = self.resolve(item_id);
        let Some(entry) = self.entries.get_mut(&resolved) else {
            warn!(item = %item_id, "Tax applied to an item the ledger does not know");
            return None;
        };

        let before = entry.tax;
        entry.tax = (before + amount).floor_zero();
        let delta = entry.tax - before;

        match entry.kind {
            ItemKind::Shipping => self.shipping_tax = (self.shipping_tax + delta).floor_zero(),
            _ => self.cart_tax = (self.cart_tax + delta).floor_zero(),
        }
        Some(delta)
    }

    /// Remove the share of an item's tax that belongs to `quantity` units and
    /// count those units as refunded. The share is taken over the units still
    /// open, so returning every open unit clears the item.
    ///
    /// Returns the amount removed.
    pub fn release(&mut self, item_id: &ItemId, quantity: Decimal) -> Decimal {
        let resolved = self.resolve(item_id);
        let Some(entry) = self.entries.get_mut(&resolved) else {
            return Decimal::zero();
        };
        let open = entry.remaining();
        if open.is_zero() {
            return Decimal::zero();
        }

        let units = if quantity.abs() > open {
            open
        } else {
            quantity.abs()
        };
        let share = if units == open {
            entry.tax
        } else {
            (entry.tax * units / open).round_cents()
        };
        entry.refunded += units;

        self.apply(&resolved, -share)
            .map(|delta| -delta)
            .unwrap_or_default()
    }

    /// Units of an item that can still be refunded. `None` when untracked.
    pub fn remaining_quantity(&self, item_id: &ItemId) -> Option<Decimal> {
        self.entry(item_id).map(LedgerEntry::remaining)
    }

    /// Record that `external` now names the item tracked as `internal`.
    pub fn link_alias(&mut self, external: ItemId, internal: ItemId) {
        if external != internal {
            self.aliases.insert(external, internal);
        }
    }

    /// Translate an externally visible id to the id used at lookup time.
    pub fn resolve(&self, item_id: &ItemId) -> ItemId {
        let mut current = item_id;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    pub fn entry(&self, item_id: &ItemId) -> Option<&LedgerEntry> {
        self.entries.get(&self.resolve(item_id))
    }

    pub fn position_of(&self, item_id: &ItemId) -> Option<(&LocationId, u32)> {
        self.entry(item_id).map(|e| (&e.location_id, e.position))
    }

    pub fn tax_of(&self, item_id: &ItemId) -> Decimal {
        self.entry(item_id).map(|e| e.tax).unwrap_or_default()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ItemId, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&ItemId, &ItemId)> {
        self.aliases.iter()
    }

    pub fn cart_tax(&self) -> Decimal {
        self.cart_tax
    }

    pub fn shipping_tax(&self) -> Decimal {
        self.shipping_tax
    }

    pub fn total_tax(&self) -> Decimal {
        self.cart_tax + self.shipping_tax
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn ledger() -> TaxLedger {
        let mut ledger = TaxLedger::new();
        let a = LocationId::new("A");
        ledger.record(ItemId::new("item1"), ItemKind::Merchandise, a.clone(), 0, d("2"));
        ledger.record(ItemId::new("ship"), ItemKind::Shipping, a.clone(), 1, d("1"));
        ledger.record(ItemId::new("fee"), ItemKind::Fee, a, 2, d("1"));
        ledger
    }

    #[test]
    fn test_reset_then_apply_is_exact() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("3.10"));
        ledger.apply(&ItemId::new("fee"), d("0.40"));

        ledger.reset();
        ledger.apply(&ItemId::new("item1"), d("2.00"));

        assert_eq!(ledger.tax_of(&ItemId::new("item1")), d("2.00"));
        assert_eq!(ledger.tax_of(&ItemId::new("fee")), Decimal::zero());
        assert_eq!(ledger.cart_tax(), d("2.00"));
        assert_eq!(ledger.shipping_tax(), Decimal::zero());
    }

    #[test]
    fn test_totals_split_by_kind() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("2.00"));
        ledger.apply(&ItemId::new("ship"), d("1.00"));
        ledger.apply(&ItemId::new("fee"), d("0.50"));

        assert_eq!(ledger.cart_tax(), d("2.50"));
        assert_eq!(ledger.shipping_tax(), d("1.00"));
        let sum: Decimal = ledger.entries().map(|(_, e)| e.tax).sum();
        assert_eq!(sum, ledger.total_tax());
    }

    #[test]
    fn test_apply_floors_at_zero() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("0.33"));
        let delta = ledger.apply(&ItemId::new("item1"), d("-0.34"));

        assert_eq!(delta, Some(d("-0.33")));
        assert_eq!(ledger.tax_of(&ItemId::new("item1")), Decimal::zero());
        assert_eq!(ledger.cart_tax(), Decimal::zero());
    }

    #[test]
    fn test_apply_unknown_item_is_ignored() {
        let mut ledger = ledger();
        assert_eq!(ledger.apply(&ItemId::new("ghost"), d("1")), None);
        assert_eq!(ledger.total_tax(), Decimal::zero());
    }

    #[test]
    fn test_release_proportional_share() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("2.00"));

        let removed = ledger.release(&ItemId::new("item1"), d("1"));
        assert_eq!(removed, d("1.00"));
        assert_eq!(ledger.tax_of(&ItemId::new("item1")), d("1.00"));

        // Over-refund caps at the recorded quantity.
        let removed = ledger.release(&ItemId::new("item1"), d("5"));
        assert_eq!(removed, d("1.00"));
        assert_eq!(ledger.cart_tax(), Decimal::zero());
    }

    #[test]
    fn test_alias_resolves_to_lookup_id() {
        let mut ledger = ledger();
        ledger.link_alias(ItemId::new("line-88"), ItemId::new("item1"));

        assert_eq!(
            ledger.position_of(&ItemId::new("line-88")),
            Some((&LocationId::new("A"), 0))
        );
        ledger.apply(&ItemId::new("line-88"), d("1.25"));
        assert_eq!(ledger.tax_of(&ItemId::new("item1")), d("1.25"));
    }

    #[test]
    fn test_alias_cycle_terminates() {
        let mut ledger = TaxLedger::new();
        ledger.link_alias(ItemId::new("x"), ItemId::new("y"));
        ledger.link_alias(ItemId::new("y"), ItemId::new("x"));
        let _ = ledger.resolve(&ItemId::new("x"));
    }

    #[test]
    fn test_from_parts_derives_totals() {
        let mut source = ledger();
        source.apply(&ItemId::new("item1"), d("2.00"));
        source.apply(&ItemId::new("ship"), d("1.00"));

        let entries: Vec<_> = source
            .entries()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let rebuilt = TaxLedger::from_parts(entries, Vec::new());
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_release_consumes_quantity() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("2.00"));

        assert_eq!(ledger.release(&ItemId::new("item1"), d("1")), d("1.00"));
        assert_eq!(ledger.remaining_quantity(&ItemId::new("item1")), Some(d("1")));
        assert_eq!(ledger.release(&ItemId::new("item1"), d("1")), d("1.00"));
        assert_eq!(ledger.remaining_quantity(&ItemId::new("item1")), Some(Decimal::zero()));
        assert!(ledger.tax_of(&ItemId::new("item1")).is_zero());

        assert!(ledger.release(&ItemId::new("item1"), d("1")).is_zero());
        assert_eq!(ledger.remaining_quantity(&ItemId::new("ghost")), None);
    }

    #[test]
    fn test_release_uneven_split_clears_last_unit() {
        let mut ledger = TaxLedger::new();
        ledger.record(ItemId::new("m"), ItemKind::Merchandise, LocationId::new("A"), 0, d("3"));
        ledger.apply(&ItemId::new("m"), d("1.00"));

        let released: Decimal = (0..3)
            .map(|_| ledger.release(&ItemId::new("m"), d("1")))
            .sum();
        assert_eq!(released, d("1.00"));
        assert!(ledger.total_tax().is_zero());
    }

    #[test]
    fn test_record_under_aliased_id_takes_over_entry() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("2.00"));
        ledger.release(&ItemId::new("item1"), d("1"));
        ledger.link_alias(ItemId::new("line-42"), ItemId::new("item1"));
        ledger.link_alias(ItemId::new("sku-7"), ItemId::new("item1"));

        ledger.record(ItemId::new("line-42"), ItemKind::Merchandise, LocationId::new("A"), 0, d("2"));

        assert!(ledger.entry(&ItemId::new("item1")).is_none());
        assert_eq!(ledger.tax_of(&ItemId::new("line-42")), d("1.00"));
        assert_eq!(ledger.remaining_quantity(&ItemId::new("line-42")), Some(d("1")));
        assert_eq!(ledger.resolve(&ItemId::new("sku-7")), ItemId::new("line-42"));
        assert_eq!(ledger.cart_tax(), d("1.00"));

        ledger.reset();
        ledger.apply(&ItemId::new("line-42"), d("2.00"));
        assert_eq!(ledger.cart_tax(), d("2.00"));
    }

    #[test]
    fn test_retain_items_drops_untracked_tax() {
        let mut ledger = ledger();
        ledger.apply(&ItemId::new("item1"), d("2.00"));
        ledger.apply(&ItemId::new("ship"), d("1.00"));

        let keep: HashSet<ItemId> = [ItemId::new("ship")].into_iter().collect();
        ledger.retain_items(&keep);

        assert_eq!(ledger.entries().count(), 1);
        assert!(ledger.cart_tax().is_zero());
        assert_eq!(ledger.shipping_tax(), d("1.00"));
    }
}
