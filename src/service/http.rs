//! JSON-over-HTTP client for the remote tax service.

use super::{
    CaptureRequest, CartLine, LineTax, LookupRequest, LookupResponse, ReturnLine, ReturnRequest,
    TaxService, TaxServiceError,
};
use crate::config::Config;
use crate::domain::{Address, Decimal};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// `ResponseType` value the service uses for a failed request.
const RESPONSE_TYPE_ERROR: i64 = 0;

#[derive(Debug, Clone)]
pub struct HttpTaxService {
    client: Client,
    base_url: String,
    api_login_id: String,
    api_key: String,
    verify_timeout: Duration,
}

impl HttpTaxService {
    /// Create a client. `lookup_timeout` bounds lookup, capture and return
    /// calls; `verify_timeout` bounds address verification and ping.
    pub fn new(
        base_url: String,
        api_login_id: String,
        api_key: String,
        lookup_timeout: Duration,
        verify_timeout: Duration,
    ) -> Result<Self, TaxServiceError> {
        let client = Client::builder()
            .timeout(lookup_timeout)
            .build()
            .map_err(|e| TaxServiceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_login_id,
            api_key,
            verify_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TaxServiceError> {
        Self::new(
            config.tax_api_url.clone(),
            config.api_login_id.clone(),
            config.api_key.clone(),
            config.lookup_timeout,
            config.verify_timeout,
        )
    }

    fn credentials(&self) -> Value {
        json!({
            "apiLoginID": self.api_login_id,
            "apiKey": self.api_key,
        })
    }

    /// POST one operation. Sent exactly once.
    async fn post(
        &self,
        operation: &str,
        mut payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TaxServiceError> {
        merge(&mut payload, self.credentials());
        let url = format!("{}/{}", self.base_url, operation);
        debug!(operation, "Calling tax service");

        let mut request = self.client.post(&url).json(&payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TaxServiceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TaxServiceError::Parse(e.to_string()))
    }

    /// POST a read-only operation, retrying transient faults until the
    /// verification timeout has elapsed.
    async fn post_idempotent(&self, operation: &str, payload: Value) -> Result<Value, TaxServiceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.verify_timeout),
            ..Default::default()
        };

        retry(backoff, || async {
            self.post(operation, payload.clone(), Some(self.verify_timeout))
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        warn!(operation, error = %e, "Transient tax service fault, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await
    }
}

#[async_trait]
impl TaxService for HttpTaxService {
    async fn lookup(&self, request: LookupRequest) -> Result<LookupResponse, TaxServiceError> {
        debug!(
            customer = %request.customer_id,
            cart_id = %request.cart_id,
            lines = request.lines.len(),
            "Lookup"
        );
        let response = self.post("Lookup", lookup_payload(&request), None).await?;
        parse_lookup_response(&response)
    }

    async fn authorized_with_capture(
        &self,
        request: CaptureRequest,
    ) -> Result<(), TaxServiceError> {
        let payload = json!({
            "customerID": request.customer_id.as_str(),
            "cartID": request.cart_id,
            "orderID": request.order_id,
            "dateAuthorized": request.date_authorized.to_rfc3339(),
            "dateCaptured": request.date_captured.to_rfc3339(),
        });
        let response = self.post("AuthorizedWithCapture", payload, None).await?;
        check_response_type(&response)
    }

    async fn returned(&self, request: ReturnRequest) -> Result<(), TaxServiceError> {
        let response = self.post("Returned", return_payload(&request), None).await?;
        check_response_type(&response)
    }

    async fn verify_address(&self, address: &Address) -> Result<Address, TaxServiceError> {
        let payload = json!({
            "Address1": address.address1,
            "Address2": address.address2,
            "City": address.city,
            "State": address.state,
            "Zip5": address.zip5,
            "Zip4": address.zip4,
        });
        let response = self.post_idempotent("VerifyAddress", payload).await?;
        parse_verified_address(&response)
    }

    async fn ping(&self) -> Result<(), TaxServiceError> {
        let response = self.post_idempotent("Ping", json!({})).await?;
        check_response_type(&response)
    }
}

fn transport_error(err: reqwest::Error) -> TaxServiceError {
    if err.is_timeout() {
        TaxServiceError::Timeout
    } else {
        TaxServiceError::Network(err.to_string())
    }
}

fn merge(target: &mut Value, extra: Value) {
    if let (Some(target), Value::Object(extra)) = (target.as_object_mut(), extra) {
        target.extend(extra);
    }
}

fn address_json(address: &Address) -> Value {
    json!({
        "Address1": address.address1,
        "Address2": address.address2,
        "City": address.city,
        "State": address.state,
        "Zip5": address.zip5,
        "Zip4": address.zip4,
    })
}

fn cart_line_json(line: &CartLine) -> Value {
    let mut value = json!({
        "Index": line.index,
        "ItemID": line.item_id.as_str(),
        "Price": line.price.to_f64(),
        "Qty": line.quantity.to_f64(),
    });
    if let Some(tic) = &line.tic {
        merge(&mut value, json!({ "TIC": tic }));
    }
    value
}

fn return_line_json(line: &ReturnLine) -> Value {
    let mut value = json!({
        "Index": line.index,
        "ItemID": line.item_id.as_str(),
        "Price": line.price.abs().to_f64(),
        "Qty": line.quantity.abs().to_f64(),
    });
    if let Some(tic) = &line.tic {
        merge(&mut value, json!({ "TIC": tic }));
    }
    value
}

pub(crate) fn lookup_payload(request: &LookupRequest) -> Value {
    json!({
        "customerID": request.customer_id.as_str(),
        "cartID": request.cart_id,
        "cartItems": request.lines.iter().map(cart_line_json).collect::<Vec<_>>(),
        "origin": address_json(&request.origin),
        "destination": address_json(&request.destination),
        "deliveredBySeller": request.delivered_by_seller,
        "exemptCert": request.exemption.as_ref().map(|c| c.to_service_json()),
    })
}

pub(crate) fn return_payload(request: &ReturnRequest) -> Value {
    let mut payload = json!({
        "orderID": request.order_id,
        "returnedDate": request.returned_date.to_rfc3339(),
    });
    if let Some(lines) = &request.lines {
        merge(
            &mut payload,
            json!({ "cartItems": lines.iter().map(return_line_json).collect::<Vec<_>>() }),
        );
    }
    payload
}

/// Collect the service's messages when `ResponseType` signals an error.
fn check_response_type(response: &Value) -> Result<(), TaxServiceError> {
    let failed = match response.get("ResponseType") {
        Some(Value::Number(n)) => n.as_i64() == Some(RESPONSE_TYPE_ERROR),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("error"),
        _ => return Err(TaxServiceError::Parse("Missing ResponseType".to_string())),
    };
    if !failed {
        return Ok(());
    }

    let messages = response
        .get("Messages")
        .and_then(|m| m.as_array())
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("Message").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| vec!["Unknown tax service error".to_string()]);

    Err(TaxServiceError::Rejected { messages })
}

fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_reported),
        Value::String(s) => Decimal::from_str_canonical(s).ok(),
        _ => None,
    }
}

pub(crate) fn parse_lookup_response(response: &Value) -> Result<LookupResponse, TaxServiceError> {
    check_response_type(response)?;

    let cart_id = response
        .get("CartID")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TaxServiceError::Parse("Missing CartID".to_string()))?
        .to_string();

    let items = response
        .get("CartItemsResponse")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TaxServiceError::Parse("Missing CartItemsResponse".to_string()))?;

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let index = item
            .get("CartItemIndex")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| TaxServiceError::Parse("Missing CartItemIndex".to_string()))?;
        let amount = item
            .get("TaxAmount")
            .and_then(parse_amount)
            .ok_or_else(|| TaxServiceError::Parse("Invalid TaxAmount".to_string()))?;
        lines.push(LineTax {
            index: index as u32,
            amount,
        });
    }

    Ok(LookupResponse { cart_id, lines })
}

pub(crate) fn parse_verified_address(response: &Value) -> Result<Address, TaxServiceError> {
    let err_number = response
        .get("ErrNumber")
        .and_then(|v| v.as_str())
        .unwrap_or("0");
    if err_number != "0" {
        let description = response
            .get("ErrDescription")
            .and_then(|v| v.as_str())
            .unwrap_or("Address could not be verified");
        return Err(TaxServiceError::rejected(description));
    }

    let field = |name: &str| {
        response
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    Ok(Address {
        address1: field("Address1"),
        address2: field("Address2"),
        city: field("City"),
        state: field("State").to_ascii_uppercase(),
        zip5: field("Zip5"),
        zip4: field("Zip4"),
    })
}
