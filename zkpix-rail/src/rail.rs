//! The seam between the pipeline and a concrete payment rail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zkpix_common::ExternalPaymentRecord;

use crate::error::RailError;

/// Acknowledgement returned when the rail accepts a payment order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Identifier used to query the order afterwards.
    pub request_id: String,
    /// Immediate outcome code reported by the rail, e.g. `APROVACAO`.
    pub raw_status: String,
    pub payment_date: Option<String>,
}

/// Which payment a status query refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentQuery {
    /// A payment this node ordered, by request id.
    Sent(String),
    /// A payment this node received, by end-to-end id.
    Received(String),
}

impl PaymentQuery {
    pub fn id(&self) -> &str {
        match self {
            PaymentQuery::Sent(id) | PaymentQuery::Received(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentQuery::Sent(_) => "sent",
            PaymentQuery::Received(_) => "received",
        }
    }
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Order a payment of `amount` minor units to `recipient_key`.
    async fn send_payment(
        &self,
        recipient_key: &str,
        amount: u64,
    ) -> Result<PaymentReceipt, RailError>;

    /// One observation of the payment's current state.
    async fn payment_status(&self, query: &PaymentQuery)
        -> Result<ExternalPaymentRecord, RailError>;
}
