use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::collaborators::{CheckoutContext, Fulfillment};
use crate::domain::{
    Address, CustomerId, Decimal, ExemptionCertificate, Item, ItemId, ItemKind, LocationId,
    OrderId, OrderStatus,
};
use crate::error::AppError;
use crate::orchestration::{LookupSummary, PartialRefundSummary, RecalculateRequest, RefundLine};

fn default_kind() -> ItemKind {
    ItemKind::Merchandise
}

fn default_quantity() -> Decimal {
    Decimal::one()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDto {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: ItemKind,
    #[serde(default = "default_quantity")]
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tic: Option<String>,
    #[serde(default)]
    pub candidate_locations: Vec<String>,
}

impl From<ItemDto> for Item {
    fn from(dto: ItemDto) -> Self {
        let mut item = Item::new(ItemId::new(dto.id), dto.kind, dto.quantity, dto.unit_price);
        item.tic = dto.tic;
        item.candidate_locations = dto
            .candidate_locations
            .into_iter()
            .map(LocationId::new)
            .collect();
        item
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRequest {
    pub customer_id: String,
    pub items: Vec<ItemDto>,
    #[serde(default)]
    pub billing: Option<Address>,
    #[serde(default)]
    pub shipping: Option<Address>,
    #[serde(default)]
    pub fulfillment: Fulfillment,
    #[serde(default)]
    pub exemption: Option<ExemptionCertificate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Absent or empty returns the whole order.
    #[serde(default)]
    pub lines: Option<Vec<RefundLine>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    /// Id the item carried when the order was looked up.
    pub item_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub order_id: OrderId,
    pub external_id: ItemId,
    pub item_id: ItemId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RefundResponse {
    Full(StatusResponse),
    Partial(PartialRefundSummary),
}

fn order_id(raw: String) -> Result<OrderId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("order id must not be empty".into()));
    }
    Ok(OrderId::new(trimmed))
}

pub async fn recalculate(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<TaxRequest>,
) -> Result<Json<LookupSummary>, AppError> {
    let order_id = order_id(raw_id)?;
    if body.customer_id.trim().is_empty() {
        return Err(AppError::BadRequest("customerId must not be empty".into()));
    }

    let request = RecalculateRequest {
        order_id,
        customer_id: CustomerId::new(body.customer_id.trim()),
        items: body.items.into_iter().map(Item::from).collect(),
        context: CheckoutContext {
            billing: body.billing,
            shipping: body.shipping,
            fulfillment: body.fulfillment,
        },
        exemption: body.exemption,
    };

    let summary = state.calculator.recalculate(request).await?;
    Ok(Json(summary))
}

pub async fn get_order(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<LookupSummary>, AppError> {
    let order_id = order_id(raw_id)?;
    let order = state
        .store
        .load_order(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
    Ok(Json(LookupSummary::from_order(&order)))
}

pub async fn capture(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, AppError> {
    let order_id = order_id(raw_id)?;
    let status = state.lifecycle.capture(&order_id, Utc::now()).await?;
    Ok(Json(StatusResponse { order_id, status }))
}

pub async fn refund(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<RefundResponse>, AppError> {
    let order_id = order_id(raw_id)?;
    let lines = body
        .and_then(|Json(request)| request.lines)
        .filter(|lines| !lines.is_empty());

    let response = match lines {
        None => {
            let status = state.lifecycle.refund_full(&order_id, Utc::now()).await?;
            RefundResponse::Full(StatusResponse { order_id, status })
        }
        Some(lines) => {
            if lines.iter().any(|l| !l.quantity.is_positive()) {
                return Err(AppError::BadRequest(
                    "refund quantities must be positive".into(),
                ));
            }
            let summary = state
                .lifecycle
                .refund_partial(&order_id, lines, Utc::now())
                .await?;
            RefundResponse::Partial(summary)
        }
    };

    Ok(Json(response))
}

pub async fn link_item(
    Path((raw_id, external)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<LinkRequest>,
) -> Result<Json<LinkResponse>, AppError> {
    let order_id = order_id(raw_id)?;
    let external = external.trim();
    let internal = body.item_id.trim();
    if external.is_empty() || internal.is_empty() {
        return Err(AppError::BadRequest("item ids must not be empty".into()));
    }

    let external = ItemId::new(external);
    let internal = ItemId::new(internal);
    state
        .calculator
        .link_item_ids(&order_id, external.clone(), internal.clone())
        .await?;
    Ok(Json(LinkResponse {
        order_id,
        external_id: external,
        item_id: internal,
    }))
}
