//! Inbox-guarded payment transaction on the account side.
//!
//! A `PaymentRequest` may be delivered any number of times. The inbox row keyed by
//! the request's message id makes sure the debit, the ledger entry and the
//! `PaymentResponse` outbox row are committed at most once; every later delivery
//! is recognised as a duplicate and acknowledged without side effects.

use crate::{
    core::{account, inbox, outbox},
    errors::{Error, Result},
    messages::{Envelope, PaymentRequest, PaymentResponse},
};
use sea_orm::{DatabaseConnection, TransactionTrait, prelude::Decimal};
use tracing::{info, instrument, warn};

/// What applying a `PaymentRequest` amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The account was debited and a successful response was queued
    Completed,
    /// The balance did not cover the amount; a declined response was queued
    InsufficientFunds,
    /// The message had already been applied; nothing was written
    Duplicate,
}

impl PaymentOutcome {
    /// Text carried in `PaymentResponse.message` for this outcome.
    #[must_use]
    pub const fn response_message(self) -> &'static str {
        match self {
            Self::Completed => "Payment completed",
            Self::InsufficientFunds => "Insufficient funds",
            Self::Duplicate => "Duplicate request",
        }
    }
}

/// Applies a payment request exactly once in effect.
///
/// 1. A request whose inbox row is already processed is a [`PaymentOutcome::Duplicate`].
/// 2. Otherwise the delivery is recorded in the inbox (if not already there).
/// 3. One transaction re-reads the inbox row, debits the account (or declines for
///    insufficient funds), queues the `PaymentResponse` and marks the inbox row
///    processed.
///
/// Any error rolls the whole transaction back and is returned so the delivery is
/// negatively acknowledged and redelivered; the failure text is kept on the inbox row.
#[instrument(
    skip(db, request),
    fields(message_id = %request.message_id, order_id = %request.order_id)
)]
pub async fn process_payment_request(
    db: &DatabaseConnection,
    request: &PaymentRequest,
) -> Result<PaymentOutcome> {
    if inbox::is_processed(db, request.message_id).await? {
        info!("Payment request already applied, skipping");
        return Ok(PaymentOutcome::Duplicate);
    }

    inbox::record_received(db, request.message_id, &request.to_json()?).await?;

    match settle(db, request).await {
        Ok(outcome) => {
            info!(?outcome, "Payment request settled");
            Ok(outcome)
        }
        Err(err) => {
            warn!(error = %err, "Payment transaction rolled back");
            if let Err(record_err) =
                inbox::record_failure(db, request.message_id, &err.to_string()).await
            {
                warn!(error = %record_err, "Could not record failure on inbox row");
            }
            Err(err)
        }
    }
}

async fn settle(db: &DatabaseConnection, request: &PaymentRequest) -> Result<PaymentOutcome> {
    let txn = db.begin().await?;

    let inbox_row = match inbox::find_by_message_id(&txn, request.message_id).await? {
        Some(row) if row.processed_at.is_none() => row,
        _ => return Ok(PaymentOutcome::Duplicate),
    };

    let account = account::get_account(&txn, request.user_id).await?;

    if request.amount <= Decimal::ZERO {
        return Err(Error::validation(format!(
            "payment amount must be positive, got {}",
            request.amount
        )));
    }

    let outcome = if account.balance < request.amount {
        PaymentOutcome::InsufficientFunds
    } else {
        account::post_ledger_entry(&txn, account.user_id, Some(request.order_id), -request.amount)
            .await?;
        PaymentOutcome::Completed
    };

    let response = PaymentResponse::for_request(
        request,
        outcome == PaymentOutcome::Completed,
        outcome.response_message(),
    );
    outbox::enqueue(&txn, &response).await?;
    inbox::mark_processed(&txn, inbox_row.id).await?;

    txn.commit().await?;
    Ok(outcome)
}
