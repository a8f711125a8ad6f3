//! Mock tax service for tests: scripted outcomes, recorded calls.

use super::{
    CaptureRequest, LineTax, LookupRequest, LookupResponse, ReturnRequest, TaxService,
    TaxServiceError,
};
use crate::domain::{Address, Decimal};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A call the mock received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Lookup(LookupRequest),
    Capture(CaptureRequest),
    Return(ReturnRequest),
    VerifyAddress(Address),
    Ping,
}

#[derive(Debug, Default)]
struct MockState {
    lookups: VecDeque<Result<Vec<LineTax>, TaxServiceError>>,
    captures: VecDeque<Result<(), TaxServiceError>>,
    returns: VecDeque<Result<(), TaxServiceError>>,
    calls: Vec<RecordedCall>,
    next_cart: u32,
}

/// In-memory [`TaxService`].
///
/// Scripted outcomes are consumed in call order per operation. When a
/// lookup queue is empty the mock taxes each line at `default_rate`.
#[derive(Debug, Default)]
pub struct MockTaxService {
    default_rate: Decimal,
    state: Mutex<MockState>,
}

impl MockTaxService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate applied to `price × quantity` when no lookup is scripted.
    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.default_rate = rate;
        self
    }

    /// Script the tax amounts of the next lookup, one per position.
    pub fn with_lookup(mut self, amounts: Vec<(u32, Decimal)>) -> Self {
        let lines = amounts
            .into_iter()
            .map(|(index, amount)| LineTax { index, amount })
            .collect();
        self.state.get_mut().lookups.push_back(Ok(lines));
        self
    }

    pub fn with_lookup_error(mut self, err: TaxServiceError) -> Self {
        self.state.get_mut().lookups.push_back(Err(err));
        self
    }

    pub fn with_capture_result(mut self, result: Result<(), TaxServiceError>) -> Self {
        self.state.get_mut().captures.push_back(result);
        self
    }

    pub fn with_return_result(mut self, result: Result<(), TaxServiceError>) -> Self {
        self.state.get_mut().returns.push_back(result);
        self
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn lookups(&self) -> Vec<LookupRequest> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Lookup(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub async fn captures(&self) -> Vec<CaptureRequest> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Capture(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub async fn returns(&self) -> Vec<ReturnRequest> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Return(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TaxService for MockTaxService {
    async fn lookup(&self, request: LookupRequest) -> Result<LookupResponse, TaxServiceError> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall::Lookup(request.clone()));

        let lines = match state.lookups.pop_front() {
            Some(scripted) => scripted?,
            None => request
                .lines
                .iter()
                .map(|line| LineTax {
                    index: line.index,
                    amount: (line.price * line.quantity * self.default_rate).round_cents(),
                })
                .collect(),
        };

        let cart_id = if request.cart_id.is_empty() {
            state.next_cart += 1;
            format!("cart-{}", state.next_cart)
        } else {
            request.cart_id
        };

        Ok(LookupResponse { cart_id, lines })
    }

    async fn authorized_with_capture(
        &self,
        request: CaptureRequest,
    ) -> Result<(), TaxServiceError> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall::Capture(request));
        state.captures.pop_front().unwrap_or(Ok(()))
    }

    async fn returned(&self, request: ReturnRequest) -> Result<(), TaxServiceError> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall::Return(request));
        state.returns.pop_front().unwrap_or(Ok(()))
    }

    async fn verify_address(&self, address: &Address) -> Result<Address, TaxServiceError> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall::VerifyAddress(address.clone()));
        if address.is_domestic() {
            let mut verified = address.clone();
            verified.state = verified.state.to_ascii_uppercase();
            Ok(verified)
        } else {
            Err(TaxServiceError::rejected("Address could not be verified"))
        }
    }

    async fn ping(&self) -> Result<(), TaxServiceError> {
        self.state.lock().await.calls.push(RecordedCall::Ping);
        Ok(())
    }
}
