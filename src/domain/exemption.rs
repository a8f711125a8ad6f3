//! Buyer exemption certificates.

use crate::domain::{Address, OrderId};
use serde::{Deserialize, Serialize};

/// Tax id printed on an exemption certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaserTaxId {
    /// `FEIN`, `StateIssued` or `ForeignDiplomat`.
    pub tax_type: String,
    pub id_number: String,
    #[serde(default)]
    pub state_of_issue: String,
}

/// An exemption certificate attached to an order.
///
/// Treated as an immutable value: binding a single-use certificate to an
/// order produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionCertificate {
    /// Id of a certificate already registered with the tax service.
    #[serde(default)]
    pub certificate_id: Option<String>,
    pub holder_name: String,
    pub holder_address: Address,
    #[serde(default)]
    pub tax_id: Option<PurchaserTaxId>,
    pub exempt_states: Vec<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub single_use: bool,
    #[serde(default)]
    pub single_use_order: Option<String>,
}

impl ExemptionCertificate {
    /// Bind a single-use certificate to the order it is consumed by.
    ///
    /// The first binding wins; reusable certificates are returned unchanged.
    pub fn consumed_for(&self, order_id: &OrderId) -> Self {
        let mut cert = self.clone();
        if cert.single_use && cert.single_use_order.is_none() {
            cert.single_use_order = Some(order_id.as_str().to_string());
        }
        cert
    }

    pub fn covers_state(&self, state: &str) -> bool {
        self.exempt_states
            .iter()
            .any(|s| s.eq_ignore_ascii_case(state.trim()))
    }

    /// JSON shape expected by the tax service.
    pub fn to_service_json(&self) -> serde_json::Value {
        if let Some(id) = &self.certificate_id {
            return serde_json::json!({ "CertificateID": id });
        }

        let (first, last) = match self.holder_name.trim().rsplit_once(' ') {
            Some((first, last)) => (first.to_string(), last.to_string()),
            None => (self.holder_name.trim().to_string(), String::new()),
        };
        let exempt_states: Vec<_> = self
            .exempt_states
            .iter()
            .map(|state| {
                serde_json::json!({
                    "StateAbbr": state,
                    "ReasonForExemption": self.reason,
                    "IdentificationNumber": self.tax_id.as_ref().map(|t| t.id_number.as_str()).unwrap_or(""),
                })
            })
            .collect();

        serde_json::json!({
            "Detail": {
                "ExemptStates": exempt_states,
                "SinglePurchase": self.single_use,
                "SinglePurchaseOrderNumber": self.single_use_order.clone().unwrap_or_default(),
                "PurchaserFirstName": first,
                "PurchaserLastName": last,
                "PurchaserAddress1": self.holder_address.address1,
                "PurchaserAddress2": self.holder_address.address2,
                "PurchaserCity": self.holder_address.city,
                "PurchaserState": self.holder_address.state,
                "PurchaserZip": self.holder_address.zip5,
                "PurchaserTaxID": self.tax_id.as_ref().map(|t| serde_json::json!({
                    "TaxType": t.tax_type,
                    "IDNumber": t.id_number,
                    "StateOfIssue": t.state_of_issue,
                })),
                "PurchaserExemptionReason": self.reason,
            }
        })
    }
}
