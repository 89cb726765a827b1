//! Wire contracts exchanged over the broker.
//!
//! Both envelopes are JSON with PascalCase property names. `message_id` is fixed
//! when the envelope is built and travels unchanged through every redelivery, which
//! is what the inbox on the receiving side deduplicates on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::errors::Result;

/// Common behaviour of every envelope carried through an outbox.
pub trait Envelope: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short name used in logs.
    const KIND: &'static str;

    /// Identifier of this message, stable across redeliveries.
    fn message_id(&self) -> Uuid;

    /// Encodes the envelope as it is stored in the outbox and sent on the wire.
    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an envelope from outbox text or a delivery body.
    fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Sent by the order side: charge `amount` from the account of `user_id` for `order_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentRequest {
    /// Order being paid for
    pub order_id: Uuid,
    /// Account owner to charge
    pub user_id: Uuid,
    /// Positive amount to debit
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Deduplication key
    pub message_id: Uuid,
    /// When the request was created
    pub timestamp: DateTime<Utc>,
}

impl PaymentRequest {
    /// Builds a request with a fresh message id.
    #[must_use]
    pub fn new(order_id: Uuid, user_id: Uuid, amount: Decimal) -> Self {
        Self {
            order_id,
            user_id,
            amount,
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}

impl Envelope for PaymentRequest {
    const KIND: &'static str = "PaymentRequest";

    fn message_id(&self) -> Uuid {
        self.message_id
    }
}

/// Sent by the account side once a [`PaymentRequest`] has been settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentResponse {
    /// Order the request was for
    pub order_id: Uuid,
    /// `false` when the account could not cover the amount
    pub success: bool,
    /// Human-readable outcome
    #[serde(default)]
    pub message: String,
    /// Identifier of this response
    pub message_id: Uuid,
    /// `message_id` of the request that produced this response
    pub original_message_id: Uuid,
    /// When the response was created
    pub timestamp: DateTime<Utc>,
}

impl PaymentResponse {
    /// Builds the response to `request` with a fresh message id.
    #[must_use]
    pub fn for_request(request: &PaymentRequest, success: bool, message: impl Into<String>) -> Self {
        Self {
            order_id: request.order_id,
            success,
            message: message.into(),
            message_id: Uuid::new_v4(),
            original_message_id: request.message_id,
            timestamp: Utc::now(),
        }
    }
}

impl Envelope for PaymentResponse {
    const KIND: &'static str = "PaymentResponse";

    fn message_id(&self) -> Uuid {
        self.message_id
    }
}
