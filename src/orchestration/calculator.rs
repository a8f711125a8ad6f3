use super::{ConfigurationError, LookupOrchestrator, LookupSummary, TaxError};
use crate::collaborators::{
    CheckoutContext, ConfiguredDestination, DestinationResolver, LocationCatalog, OrderStore,
};
use crate::config::Config;
use crate::domain::{
    CustomerId, ExemptionCertificate, Item, ItemId, ItemKind, Order, OrderId, OrderStatus,
};
use crate::engine::{FeeInclusion, LocationRouter};
use crate::service::TaxService;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything needed to (re)compute an order's tax.
#[derive(Debug, Clone)]
pub struct RecalculateRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<Item>,
    pub context: CheckoutContext,
    pub exemption: Option<ExemptionCertificate>,
}

/// Full recalculation flow: resolve destination, partition, look up and
/// persist.
pub struct TaxCalculator {
    catalog: Arc<dyn LocationCatalog>,
    store: Arc<dyn OrderStore>,
    resolver: Arc<dyn DestinationResolver>,
    router: Arc<LocationRouter>,
    lookup: LookupOrchestrator,
    has_credentials: bool,
}

impl TaxCalculator {
    pub fn new(
        service: Arc<dyn TaxService>,
        catalog: Arc<dyn LocationCatalog>,
        store: Arc<dyn OrderStore>,
        config: &Config,
    ) -> Self {
        let router = LocationRouter::new().with_filter(FeeInclusion {
            include_fees: config.tax_fees,
        });
        Self {
            catalog,
            store,
            resolver: Arc::new(ConfiguredDestination {
                taxable_address: config.taxable_address,
            }),
            router: Arc::new(router),
            lookup: LookupOrchestrator::new(service, config.shipping_tic.clone()),
            has_credentials: config.has_credentials(),
        }
    }

    pub fn with_router(mut self, router: LocationRouter) -> Self {
        self.router = Arc::new(router);
        self
    }

    pub fn with_resolver(mut self, resolver: impl DestinationResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Router shared with the lifecycle manager for refund re-routing.
    pub fn router(&self) -> Arc<LocationRouter> {
        self.router.clone()
    }

    /// Recompute and persist the tax of an order.
    ///
    /// The order is saved even when a group's lookup fails, so tax for the
    /// groups that succeeded survives.
    pub async fn recalculate(&self, request: RecalculateRequest) -> Result<LookupSummary, TaxError> {
        if !self.has_credentials {
            return Err(ConfigurationError::MissingCredentials.into());
        }

        let locations = self.catalog.list_origin_locations().await?;
        if locations.is_empty() {
            return Err(ConfigurationError::NoOriginLocations.into());
        }

        let mut destination = self
            .resolver
            .destination_for(&request.context, &locations)
            .ok_or(ConfigurationError::MissingDestination)?;
        destination.state = destination.state.trim().to_ascii_uppercase();
        if !destination.is_domestic() {
            return Err(ConfigurationError::NonDomesticDestination(destination.state.clone()).into());
        }

        let mut items = request.items;
        for item in items
            .iter_mut()
            .filter(|i| i.kind == ItemKind::Merchandise && i.candidate_locations.is_empty())
        {
            item.candidate_locations = self.catalog.candidate_locations_for(&item.id).await?;
        }

        let mut order = match self.store.load_order(&request.order_id).await? {
            Some(order) => order,
            None => Order::new(request.order_id.clone(), request.customer_id.clone()),
        };
        if order.status == OrderStatus::Refunded {
            return Err(TaxError::InvalidTransition {
                from: OrderStatus::Refunded,
                op: "recalculate",
            });
        }

        order.customer_id = request.customer_id;
        order.exemption = request.exemption.map(|cert| cert.consumed_for(&order.id));
        if let Some(cert) = order
            .exemption
            .as_ref()
            .filter(|cert| !cert.covers_state(&destination.state))
        {
            warn!(
                order_id = %order.id,
                state = %destination.state,
                certificate = ?cert.certificate_id,
                "Exemption certificate does not list the destination state; sending it unchanged"
            );
        }

        let partition = self
            .router
            .partition(&items, &destination.state, &locations)?;
        order.adopt_partition(&partition);
        order.ledger.reset();
        order.destination = Some(destination.clone());

        let result = self
            .lookup
            .lookup(
                &mut order,
                &locations,
                &destination,
                request.context.delivered_by_seller(),
            )
            .await;

        if let Err(e) = self.store.save_order(&order).await {
            if result.is_ok() {
                return Err(e.into());
            }
            warn!(order_id = %order.id, error = %e, "Failed to persist partially taxed order");
        }

        if let Ok(summary) = &result {
            info!(
                order_id = %order.id,
                groups = order.groups.len(),
                total_tax = %summary.total_tax,
                "Order tax recalculated"
            );
        }
        result
    }

    /// Record that the platform now calls `internal` by `external`.
    pub async fn link_item_ids(
        &self,
        order_id: &OrderId,
        external: ItemId,
        internal: ItemId,
    ) -> Result<(), TaxError> {
        let mut order = self
            .store
            .load_order(order_id)
            .await?
            .ok_or_else(|| TaxError::OrderNotFound(order_id.to_string()))?;
        order.ledger.link_alias(external, internal);
        self.store.save_order(&order).await?;
        Ok(())
    }
}
