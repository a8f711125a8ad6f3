//! Capture and refund of orders at the tax service.
//!
//! Transitions: `PendingCapture -> Captured -> Refunded`. A partial refund
//! leaves the order `Captured`. Remote failures abort the operation without
//! a status change; work already accepted by the service for earlier
//! groups is not rolled back.

use super::TaxError;
use crate::collaborators::{LocationCatalog, OrderStore};
use crate::domain::{Decimal, ItemId, LocationId, Order, OrderId, OrderStatus};
use crate::engine::LocationRouter;
use crate::service::{CaptureRequest, ReturnLine, ReturnRequest, TaxService};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One line of a partial refund.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundLine {
    pub item_id: ItemId,
    /// Origin location the item was taxed at, when the caller knows it.
    #[serde(default)]
    pub location_id: Option<LocationId>,
    pub quantity: Decimal,
    /// Refunded unit price. Defaults to the price sent at lookup time.
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRefundSummary {
    pub order_id: OrderId,
    pub lines_returned: usize,
    pub lines_dropped: usize,
    pub tax_released: Decimal,
    pub remaining_tax: Decimal,
}

/// Item positions per location, as produced by re-routing an order.
type Routed = Vec<(LocationId, Vec<(ItemId, u32)>)>;

/// A refund line resolved to a concrete group position.
struct Located {
    location_id: LocationId,
    item_id: ItemId,
    line: ReturnLine,
}

pub struct OrderLifecycle {
    service: Arc<dyn TaxService>,
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn LocationCatalog>,
    router: Arc<LocationRouter>,
}

impl OrderLifecycle {
    pub fn new(
        service: Arc<dyn TaxService>,
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn LocationCatalog>,
        router: Arc<LocationRouter>,
    ) -> Self {
        Self {
            service,
            store,
            catalog,
            router,
        }
    }

    async fn load(&self, order_id: &OrderId) -> Result<Order, TaxError> {
        self.store
            .load_order(order_id)
            .await?
            .ok_or_else(|| TaxError::OrderNotFound(order_id.to_string()))
    }

    /// Commit every location group of a looked-up order.
    pub async fn capture(
        &self,
        order_id: &OrderId,
        at: DateTime<Utc>,
    ) -> Result<OrderStatus, TaxError> {
        let order = self.load(order_id).await?;

        match order.status {
            OrderStatus::Captured => {
                debug!(order_id = %order_id, "Order already captured");
                return Ok(OrderStatus::Captured);
            }
            OrderStatus::Refunded => {
                return Err(TaxError::InvalidTransition {
                    from: OrderStatus::Refunded,
                    op: "capture",
                })
            }
            OrderStatus::PendingCapture => {}
        }

        if order.groups.is_empty() {
            return Err(TaxError::NotLookedUp {
                location: "(none)".to_string(),
            });
        }
        if let Some(group) = order.groups.iter().find(|g| g.cart_id.is_none()) {
            return Err(TaxError::NotLookedUp {
                location: group.location_id.to_string(),
            });
        }

        for group in &order.groups {
            let request = CaptureRequest {
                cart_id: group.cart_id.clone().unwrap_or_default(),
                customer_id: order.customer_id.clone(),
                order_id: group.external_order_id.clone(),
                date_authorized: at,
                date_captured: at,
            };
            debug!(order_id = %order_id, location = %group.location_id, "Capturing location group");

            if let Err(e) = self.service.authorized_with_capture(request).await {
                warn!(
                    order_id = %order_id,
                    location = %group.location_id,
                    error = %e,
                    "Capture failed; order stays pending"
                );
                return Err(e.into());
            }
        }

        self.store
            .save_status(order_id, OrderStatus::Captured)
            .await?;
        info!(order_id = %order_id, groups = order.groups.len(), "Order captured");
        Ok(OrderStatus::Captured)
    }

    /// Return a captured order in full.
    pub async fn refund_full(
        &self,
        order_id: &OrderId,
        at: DateTime<Utc>,
    ) -> Result<OrderStatus, TaxError> {
        let mut order = self.load(order_id).await?;
        if order.status != OrderStatus::Captured {
            return Err(TaxError::InvalidTransition {
                from: order.status,
                op: "refund",
            });
        }

        for group in &order.groups {
            let request = ReturnRequest {
                order_id: group.external_order_id.clone(),
                returned_date: at,
                lines: None,
            };
            debug!(order_id = %order_id, location = %group.location_id, "Returning location group");

            if let Err(e) = self.service.returned(request).await {
                warn!(
                    order_id = %order_id,
                    location = %group.location_id,
                    error = %e,
                    "Full refund failed; order stays captured"
                );
                return Err(e.into());
            }
        }

        order.ledger.reset();
        order.status = OrderStatus::Refunded;
        self.store.save_order(&order).await?;
        info!(order_id = %order_id, "Order refunded");
        Ok(OrderStatus::Refunded)
    }

    /// Return part of a captured order. The order stays `Captured`.
    ///
    /// Lines are sent per original location group, in the order their
    /// location is first seen. Lines that cannot be placed in a group are
    /// dropped with a warning.
    pub async fn refund_partial(
        &self,
        order_id: &OrderId,
        lines: Vec<RefundLine>,
        at: DateTime<Utc>,
    ) -> Result<PartialRefundSummary, TaxError> {
        let mut order = self.load(order_id).await?;
        if order.status != OrderStatus::Captured {
            return Err(TaxError::InvalidTransition {
                from: order.status,
                op: "partially refund",
            });
        }

        let requested = lines.len();
        let located = self.locate_lines(&order, lines).await?;
        let mut lines_dropped = requested - located.len();

        let mut batches: Vec<(LocationId, Vec<Located>)> = Vec::new();
        for line in located {
            match batches.iter().position(|(loc, _)| *loc == line.location_id) {
                Some(slot) => batches[slot].1.push(line),
                None => batches.push((line.location_id.clone(), vec![line])),
            }
        }

        let mut tax_released = Decimal::zero();
        let mut lines_returned = 0usize;
        let mut failure = None;

        for (location_id, batch) in batches {
            let Some(group) = order.group(&location_id) else {
                warn!(
                    order_id = %order_id,
                    location = %location_id,
                    lines = batch.len(),
                    "Refund lines reference a location group the order does not have; dropping"
                );
                lines_dropped += batch.len();
                continue;
            };

            let request = ReturnRequest {
                order_id: group.external_order_id.clone(),
                returned_date: at,
                lines: Some(batch.iter().map(|l| l.line.clone()).collect()),
            };
            debug!(order_id = %order_id, location = %location_id, "Returning refund lines");

            if let Err(e) = self.service.returned(request).await {
                warn!(
                    order_id = %order_id,
                    location = %location_id,
                    error = %e,
                    "Partial refund failed; earlier groups stand"
                );
                failure = Some(e);
                break;
            }

            for located in &batch {
                tax_released += order.ledger.release(&located.item_id, located.line.quantity);
            }
            lines_returned += batch.len();
        }

        if lines_returned > 0 {
            self.store.save_order(&order).await?;
        }
        if let Some(e) = failure {
            return Err(e.into());
        }

        info!(
            order_id = %order_id,
            lines = lines_returned,
            released = %tax_released,
            "Order partially refunded"
        );
        Ok(PartialRefundSummary {
            order_id: order.id.clone(),
            lines_returned,
            lines_dropped,
            tax_released,
            remaining_tax: order.ledger.total_tax(),
        })
    }

    /// Resolve each refund line to `(location, position)`.
    ///
    /// The ledger's position record is used first. Items it cannot place are
    /// routed again over the order's recorded lines and destination. Lines
    /// asking for more units than remain unrefunded are dropped.
    async fn locate_lines(
        &self,
        order: &Order,
        lines: Vec<RefundLine>,
    ) -> Result<Vec<Located>, TaxError> {
        let mut rerouted: Option<Routed> = None;
        let mut located = Vec::with_capacity(lines.len());
        let mut claimed: HashMap<ItemId, Decimal> = HashMap::new();

        for refund in lines {
            let item_id = order.ledger.resolve(&refund.item_id);

            let recorded = order
                .ledger
                .position_of(&item_id)
                .filter(|(loc, _)| refund.location_id.as_ref().map_or(true, |want| want == *loc))
                .map(|(loc, pos)| (loc.clone(), pos));

            let position = match recorded {
                Some(found) => Some(found),
                None => {
                    if rerouted.is_none() {
                        rerouted = Some(self.reroute(order).await?);
                    }
                    rerouted
                        .as_ref()
                        .and_then(|groups| {
                            groups.iter().find_map(|(loc, items)| {
                                if refund.location_id.as_ref().is_some_and(|want| want != loc) {
                                    return None;
                                }
                                items
                                    .iter()
                                    .find(|(id, _)| *id == item_id)
                                    .map(|(_, pos)| (loc.clone(), *pos))
                            })
                        })
                }
            };

            let Some((location_id, position)) = position else {
                warn!(
                    order_id = %order.id,
                    item = %refund.item_id,
                    "Refund item cannot be mapped to a location group; dropping"
                );
                continue;
            };

            if let Some(open) = order.ledger.remaining_quantity(&item_id) {
                let taken = claimed.entry(item_id.clone()).or_default();
                let wanted = *taken + refund.quantity.abs();
                if wanted > open {
                    warn!(
                        order_id = %order.id,
                        item = %refund.item_id,
                        quantity = %refund.quantity,
                        remaining = %(open - *taken),
                        "Refund exceeds unrefunded quantity; dropping"
                    );
                    continue;
                }
                *taken = wanted;
            }

            let original = order
                .group(&location_id)
                .and_then(|g| g.line_for(&item_id));
            let price = refund
                .price
                .or_else(|| original.map(|l| l.unit_price))
                .unwrap_or_default();

            located.push(Located {
                location_id,
                item_id: item_id.clone(),
                line: ReturnLine {
                    index: position,
                    item_id,
                    tic: original.and_then(|l| l.tic.clone()),
                    price: price.abs(),
                    quantity: refund.quantity.abs(),
                },
            });
        }

        Ok(located)
    }

    /// Route the order's recorded lines again. Empty when the order has no
    /// recorded destination.
    async fn reroute(
        &self,
        order: &Order,
    ) -> Result<Routed, TaxError> {
        let Some(destination) = &order.destination else {
            return Ok(Vec::new());
        };
        let locations = self.catalog.list_origin_locations().await?;
        let partition =
            self.router
                .partition(&order.recorded_items(), &destination.state, &locations)?;

        Ok(partition
            .groups
            .into_iter()
            .map(|g| {
                let items = g
                    .lines
                    .into_iter()
                    .map(|l| (l.item.id, l.position))
                    .collect();
                (g.location_id, items)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticLocationCatalog;
    use crate::db::repo::test_support::temp_repo;
    use crate::domain::{Address, CustomerId, Item, OriginLocation};
    use crate::service::{MockTaxService, TaxServiceError};
    use tempfile::TempDir;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn locations() -> Vec<OriginLocation> {
        vec![
            OriginLocation::new("A", Address::new("1 A St", "", "Seattle", "WA", "98101")),
            OriginLocation::new("B", Address::new("1 B St", "", "Portland", "OR", "97201")),
        ]
    }

    type Fixture = (OrderLifecycle, Arc<MockTaxService>, Arc<crate::db::Repository>, TempDir);

    async fn setup(status: OrderStatus, mock: MockTaxService) -> Fixture {
        setup_with_router(status, mock, LocationRouter::new()).await
    }

    async fn setup_with_router(
        status: OrderStatus,
        mock: MockTaxService,
        router: LocationRouter,
    ) -> Fixture {
        let (repo, temp) = temp_repo().await;
        let repo = Arc::new(repo);
        let planner = LocationRouter::new();

        let items = vec![
            Item::merchandise("m1", d("2"), d("10")).with_candidates(["A"]),
            Item::merchandise("m2", d("1"), d("30")).with_candidates(["B"]),
            Item::shipping("ship", d("5")),
        ];
        let mut order = Order::new(OrderId::new("1001"), CustomerId::new("cust-1"));
        order.destination = Some(Address::new("9 Dest Rd", "", "Tacoma", "WA", "98402"));
        order.adopt_partition(&planner.partition(&items, "WA", &locations()).unwrap());
        order.groups[0].cart_id = Some("cart-a".to_string());
        order.groups[1].cart_id = Some("cart-b".to_string());
        order.ledger.apply(&ItemId::new("m1"), d("2.00"));
        order.ledger.apply(&ItemId::new("m2"), d("3.00"));
        order.ledger.apply(&ItemId::new("ship"), d("0.50"));
        order.status = status;
        repo.save_order(&order).await.unwrap();

        let mock = Arc::new(mock);
        let lifecycle = OrderLifecycle::new(
            mock.clone(),
            repo.clone(),
            Arc::new(StaticLocationCatalog::new(locations())),
            Arc::new(router),
        );
        (lifecycle, mock, repo, temp)
    }

    fn order_id() -> OrderId {
        OrderId::new("1001")
    }

    #[tokio::test]
    async fn test_capture_commits_every_group_once() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::PendingCapture, MockTaxService::new()).await;

        let now = Utc::now();
        assert_eq!(lifecycle.capture(&order_id(), now).await.unwrap(), OrderStatus::Captured);
        assert_eq!(lifecycle.capture(&order_id(), now).await.unwrap(), OrderStatus::Captured);

        let captures = mock.captures().await;
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].cart_id, "cart-a");
        assert_eq!(captures[1].cart_id, "cart-b");
        assert_eq!(
            repo.load_status(&order_id()).await.unwrap(),
            Some(OrderStatus::Captured)
        );
    }

    #[tokio::test]
    async fn test_capture_failure_leaves_status() {
        let mock = MockTaxService::new()
            .with_capture_result(Ok(()))
            .with_capture_result(Err(TaxServiceError::rejected("cart expired")));
        let (lifecycle, _mock, repo, _temp) = setup(OrderStatus::PendingCapture, mock).await;

        let result = lifecycle.capture(&order_id(), Utc::now()).await;
        assert!(matches!(result, Err(TaxError::Service(_))));
        assert_eq!(
            repo.load_status(&order_id()).await.unwrap(),
            Some(OrderStatus::PendingCapture)
        );
    }

    #[tokio::test]
    async fn test_capture_without_cart_id_makes_no_call() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::PendingCapture, MockTaxService::new()).await;
        let mut order = repo.load_order(&order_id()).await.unwrap().unwrap();
        order.groups[1].cart_id = None;
        repo.save_order(&order).await.unwrap();

        let result = lifecycle.capture(&order_id(), Utc::now()).await;
        assert!(matches!(result, Err(TaxError::NotLookedUp { location }) if location == "B"));
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_capture_refunded_order_rejected() {
        let (lifecycle, mock, _repo, _temp) =
            setup(OrderStatus::Refunded, MockTaxService::new()).await;
        let result = lifecycle.capture(&order_id(), Utc::now()).await;
        assert!(matches!(
            result,
            Err(TaxError::InvalidTransition {
                from: OrderStatus::Refunded,
                ..
            })
        ));
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_capture_missing_order() {
        let (lifecycle, _mock, _repo, _temp) =
            setup(OrderStatus::PendingCapture, MockTaxService::new()).await;
        let result = lifecycle.capture(&OrderId::new("nope"), Utc::now()).await;
        assert!(matches!(result, Err(TaxError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_full_refund_requires_capture() {
        let (lifecycle, mock, _repo, _temp) =
            setup(OrderStatus::PendingCapture, MockTaxService::new()).await;
        let result = lifecycle.refund_full(&order_id(), Utc::now()).await;
        assert!(matches!(result, Err(TaxError::InvalidTransition { .. })));
        assert!(mock.returns().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_refund_zeroes_ledger() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;

        let status = lifecycle.refund_full(&order_id(), Utc::now()).await.unwrap();
        assert_eq!(status, OrderStatus::Refunded);

        let returns = mock.returns().await;
        assert_eq!(returns.len(), 2);
        assert!(returns.iter().all(|r| r.lines.is_none()));

        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
        assert!(order.ledger.total_tax().is_zero());
    }

    #[tokio::test]
    async fn test_full_refund_failure_keeps_captured() {
        let mock = MockTaxService::new().with_return_result(Err(TaxServiceError::Timeout));
        let (lifecycle, _mock, repo, _temp) = setup(OrderStatus::Captured, mock).await;

        assert!(lifecycle.refund_full(&order_id(), Utc::now()).await.is_err());
        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Captured);
        assert_eq!(order.ledger.total_tax(), d("5.50"));
    }

    #[tokio::test]
    async fn test_partial_refund_sends_positive_prices_per_group() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;

        let summary = lifecycle
            .refund_partial(
                &order_id(),
                vec![
                    RefundLine {
                        item_id: ItemId::new("m2"),
                        location_id: None,
                        quantity: d("1"),
                        price: Some(d("-30")),
                    },
                    RefundLine {
                        item_id: ItemId::new("m1"),
                        location_id: Some(LocationId::new("A")),
                        quantity: d("1"),
                        price: None,
                    },
                ],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_returned, 2);
        assert_eq!(summary.tax_released, d("4.00"));

        let returns = mock.returns().await;
        assert_eq!(returns.len(), 2);
        let first = returns[0].lines.as_ref().unwrap();
        assert_eq!(first[0].item_id, ItemId::new("m2"));
        assert_eq!(first[0].price, d("30"));
        let second = returns[1].lines.as_ref().unwrap();
        assert_eq!(second[0].price, d("10"));
        assert_eq!(second[0].index, 0);

        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Captured);
        assert_eq!(order.ledger.tax_of(&ItemId::new("m1")), d("1.00"));
        assert!(order.ledger.tax_of(&ItemId::new("m2")).is_zero());
    }

    #[tokio::test]
    async fn test_partial_refund_drops_unmappable_items() {
        let (lifecycle, mock, _repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;

        let summary = lifecycle
            .refund_partial(
                &order_id(),
                vec![RefundLine {
                    item_id: ItemId::new("ghost"),
                    location_id: None,
                    quantity: d("1"),
                    price: None,
                }],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_dropped, 1);
        assert_eq!(summary.lines_returned, 0);
        assert!(mock.returns().await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_refund_follows_item_alias() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;
        let mut order = repo.load_order(&order_id()).await.unwrap().unwrap();
        order
            .ledger
            .link_alias(ItemId::new("line-9"), ItemId::new("ship"));
        repo.save_order(&order).await.unwrap();

        let summary = lifecycle
            .refund_partial(
                &order_id(),
                vec![RefundLine {
                    item_id: ItemId::new("line-9"),
                    location_id: None,
                    quantity: d("1"),
                    price: None,
                }],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.tax_released, d("0.50"));
        let returns = mock.returns().await;
        let lines = returns[0].lines.as_ref().unwrap();
        assert_eq!(lines[0].item_id, ItemId::new("ship"));
        assert_eq!(lines[0].index, 1);
    }

    #[tokio::test]
    async fn test_partial_refund_requires_capture() {
        let (lifecycle, mock, _repo, _temp) =
            setup(OrderStatus::PendingCapture, MockTaxService::new()).await;
        let result = lifecycle
            .refund_partial(&order_id(), Vec::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(TaxError::InvalidTransition { .. })));
        assert!(mock.calls().await.is_empty());
    }

    fn refund(item: &str, quantity: &str) -> RefundLine {
        RefundLine {
            item_id: ItemId::new(item),
            location_id: None,
            quantity: d(quantity),
            price: None,
        }
    }

    /// Drop an item's position record so refunds must route it again.
    async fn forget_position(repo: &crate::db::Repository, item: &str) {
        let mut order = repo.load_order(&order_id()).await.unwrap().unwrap();
        let entries: Vec<_> = order
            .ledger
            .entries()
            .filter(|(id, _)| id.as_str() != item)
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        order.ledger = crate::engine::TaxLedger::from_parts(entries, Vec::new());
        repo.save_order(&order).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_refunds_use_up_quantity() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;

        let first = lifecycle
            .refund_partial(&order_id(), vec![refund("m1", "1")], Utc::now())
            .await
            .unwrap();
        let second = lifecycle
            .refund_partial(&order_id(), vec![refund("m1", "1")], Utc::now())
            .await
            .unwrap();
        assert_eq!(first.tax_released, d("1.00"));
        assert_eq!(second.tax_released, d("1.00"));

        let third = lifecycle
            .refund_partial(&order_id(), vec![refund("m1", "1")], Utc::now())
            .await
            .unwrap();
        assert_eq!(third.lines_returned, 0);
        assert_eq!(third.lines_dropped, 1);
        assert!(third.tax_released.is_zero());
        assert_eq!(mock.returns().await.len(), 2);

        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        assert!(order.ledger.tax_of(&ItemId::new("m1")).is_zero());
        assert_eq!(
            order.ledger.remaining_quantity(&ItemId::new("m1")),
            Some(Decimal::zero())
        );
    }

    #[tokio::test]
    async fn test_partial_refund_over_quantity_in_one_request() {
        let (lifecycle, mock, _repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;

        let summary = lifecycle
            .refund_partial(
                &order_id(),
                vec![refund("m1", "1"), refund("m1", "2"), refund("m2", "1")],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_returned, 2);
        assert_eq!(summary.lines_dropped, 1);
        assert_eq!(summary.tax_released, d("4.00"));
        assert_eq!(mock.returns().await.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_refund_second_group_failure_keeps_first() {
        let mock = MockTaxService::new()
            .with_return_result(Ok(()))
            .with_return_result(Err(TaxServiceError::Timeout));
        let (lifecycle, mock, repo, _temp) = setup(OrderStatus::Captured, mock).await;

        let result = lifecycle
            .refund_partial(
                &order_id(),
                vec![refund("m2", "1"), refund("m1", "1")],
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(TaxError::Service(TaxServiceError::Timeout))));
        assert_eq!(mock.returns().await.len(), 2);

        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Captured);
        assert!(order.ledger.tax_of(&ItemId::new("m2")).is_zero());
        assert_eq!(order.ledger.tax_of(&ItemId::new("m1")), d("2.00"));
        assert_eq!(order.ledger.total_tax(), d("2.50"));
    }

    #[tokio::test]
    async fn test_partial_refund_reroutes_unrecorded_item() {
        let (lifecycle, mock, repo, _temp) =
            setup(OrderStatus::Captured, MockTaxService::new()).await;
        forget_position(&repo, "m2").await;

        let summary = lifecycle
            .refund_partial(&order_id(), vec![refund("m2", "1")], Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.lines_returned, 1);
        assert_eq!(summary.lines_dropped, 0);

        let order = repo.load_order(&order_id()).await.unwrap().unwrap();
        let group_b = order.group(&LocationId::new("B")).unwrap();
        let returns = mock.returns().await;
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].order_id, group_b.external_order_id);
        let lines = returns[0].lines.as_ref().unwrap();
        assert_eq!(lines[0].item_id, ItemId::new("m2"));
        assert_eq!(lines[0].index, 0);
        assert_eq!(lines[0].price, d("30"));
    }

    struct ShipFromIdaho;

    impl crate::engine::LocationOverride for ShipFromIdaho {
        fn choose(&self, _item: &Item, _state: &str, _chosen: LocationId) -> LocationId {
            LocationId::new("C")
        }
    }

    #[tokio::test]
    async fn test_partial_refund_counts_lines_rerouted_to_missing_group() {
        let router = LocationRouter::new().with_override(ShipFromIdaho);
        let (lifecycle, mock, repo, _temp) =
            setup_with_router(OrderStatus::Captured, MockTaxService::new(), router).await;
        forget_position(&repo, "m2").await;

        let summary = lifecycle
            .refund_partial(
                &order_id(),
                vec![refund("m2", "1"), refund("m1", "1")],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_returned, 1);
        assert_eq!(summary.lines_dropped, 1);
        assert_eq!(mock.returns().await.len(), 1);
    }
}
