use super::{ConfigurationError, TaxError};
use crate::domain::{
    Address, Decimal, ItemId, ItemKind, LocationGroup, LocationId, Order, OrderId, OrderStatus,
    OriginLocation,
};
use crate::service::{CartLine, LookupRequest, TaxService};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends one lookup per location group and folds the answers into the
/// order's ledger.
#[derive(Debug, Clone)]
pub struct LookupOrchestrator {
    service: Arc<dyn TaxService>,
    shipping_tic: String,
}

impl LookupOrchestrator {
    pub fn new(service: Arc<dyn TaxService>, shipping_tic: impl Into<String>) -> Self {
        Self {
            service,
            shipping_tic: shipping_tic.into(),
        }
    }

    /// Look up every group of `order` in group order.
    ///
    /// The ledger must already be reset. On the first failing group the
    /// error is returned; groups before it keep their tax and cart ids.
    pub async fn lookup(
        &self,
        order: &mut Order,
        locations: &[OriginLocation],
        destination: &Address,
        delivered_by_seller: bool,
    ) -> Result<LookupSummary, TaxError> {
        for slot in 0..order.groups.len() {
            let request = self.build_request(
                order,
                &order.groups[slot],
                locations,
                destination,
                delivered_by_seller,
            )?;
            let location = order.groups[slot].location_id.clone();

            debug!(
                order_id = %order.id,
                location = %location,
                lines = request.lines.len(),
                "Sending tax lookup"
            );

            let response = match self.service.lookup(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        order_id = %order.id,
                        location = %location,
                        error = %e,
                        "Tax lookup failed; earlier groups keep their tax"
                    );
                    return Err(e.into());
                }
            };

            let group = &mut order.groups[slot];
            if !response.cart_id.is_empty() {
                group.cart_id = Some(response.cart_id);
            }

            for line_tax in response.lines {
                let Some(line) = group.line_at(line_tax.index) else {
                    warn!(
                        order_id = %order.id,
                        location = %location,
                        position = line_tax.index,
                        "Tax service returned an unknown line position"
                    );
                    continue;
                };
                order.ledger.apply(&line.item_id, line_tax.amount);
            }
        }

        Ok(LookupSummary::from_order(order))
    }

    fn build_request(
        &self,
        order: &Order,
        group: &LocationGroup,
        locations: &[OriginLocation],
        destination: &Address,
        delivered_by_seller: bool,
    ) -> Result<LookupRequest, TaxError> {
        let origin = locations
            .iter()
            .find(|l| l.id == group.location_id)
            .ok_or_else(|| {
                ConfigurationError::UnknownOriginLocation(group.location_id.to_string())
            })?;

        let lines = group
            .lines
            .iter()
            .map(|line| CartLine {
                index: line.position,
                item_id: line.item_id.clone(),
                tic: match (&line.tic, line.kind) {
                    (Some(tic), _) => Some(tic.clone()),
                    (None, ItemKind::Shipping) => Some(self.shipping_tic.clone()),
                    (None, _) => None,
                },
                price: line.unit_price,
                quantity: line.quantity,
            })
            .collect();

        Ok(LookupRequest {
            customer_id: order.customer_id.clone(),
            cart_id: group.cart_id.clone().unwrap_or_default(),
            lines,
            origin: origin.address.clone(),
            destination: destination.clone(),
            delivered_by_seller,
            exemption: order.exemption.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub location_id: LocationId,
    pub cart_id: Option<String>,
    pub external_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTax {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub location_id: LocationId,
    pub position: u32,
    pub tax: Decimal,
}

/// Snapshot of an order's tax state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub cart_tax: Decimal,
    pub shipping_tax: Decimal,
    pub total_tax: Decimal,
    pub groups: Vec<GroupSummary>,
    pub items: Vec<ItemTax>,
}

impl LookupSummary {
    pub fn from_order(order: &Order) -> Self {
        let groups = order
            .groups
            .iter()
            .map(|g| GroupSummary {
                location_id: g.location_id.clone(),
                cart_id: g.cart_id.clone(),
                external_order_id: g.external_order_id.clone(),
            })
            .collect();

        let items = order
            .groups
            .iter()
            .flat_map(|g| {
                g.lines.iter().map(move |line| ItemTax {
                    item_id: line.item_id.clone(),
                    kind: line.kind,
                    location_id: g.location_id.clone(),
                    position: line.position,
                    tax: order.ledger.tax_of(&line.item_id),
                })
            })
            .collect();

        LookupSummary {
            order_id: order.id.clone(),
            status: order.status,
            cart_tax: order.ledger.cart_tax(),
            shipping_tax: order.ledger.shipping_tax(),
            total_tax: order.ledger.total_tax(),
            groups,
            items,
        }
    }
}
