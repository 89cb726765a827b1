//! Account business logic - balances and their ledger on the account side.
//!
//! A balance never changes on its own: every change goes through
//! [`post_ledger_entry`], which appends the signed `payments` row and adjusts the
//! balance in the caller's transaction.

use crate::{
    entities::{Account, Payment, account, payment},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

/// Opens an account with a zero balance.
///
/// Fails with [`Error::Conflict`] when the user already has one.
#[instrument(skip(db))]
pub async fn create_account(db: &DatabaseConnection, user_id: Uuid) -> Result<account::Model> {
    let txn = db.begin().await?;

    if Account::find_by_id(user_id).one(&txn).await?.is_some() {
        return Err(Error::Conflict {
            message: format!("user {user_id} already has an account"),
        });
    }

    let account = account::ActiveModel {
        user_id: Set(user_id),
        balance: Set(Decimal::ZERO),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!("Account created");
    Ok(account)
}

/// Retrieves the account of `user_id`.
pub async fn get_account<C>(db: &C, user_id: Uuid) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    Account::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Account", user_id))
}

/// Appends a signed ledger entry and applies it to the balance.
///
/// The balance is adjusted with a single `UPDATE accounts SET balance = balance + ?`
/// so it stays consistent with the entry even if the caller's copy of the account
/// is stale. Must run inside the caller's transaction.
pub async fn post_ledger_entry<C>(
    db: &C,
    user_id: Uuid,
    order_id: Option<Uuid>,
    amount: Decimal,
) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let entry = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        account_id: Set(user_id),
        order_id: Set(order_id),
        amount: Set(amount),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    let updated = Account::update_many()
        .col_expr(
            account::Column::Balance,
            Expr::col(account::Column::Balance).add(amount),
        )
        .filter(account::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::not_found("Account", user_id));
    }
    Ok(entry)
}

/// Tops up the balance of `user_id` by a positive `amount`.
///
/// Writes a positive ledger entry and the new balance in one transaction.
#[instrument(skip(db))]
pub async fn increase_balance(
    db: &DatabaseConnection,
    user_id: Uuid,
    amount: Decimal,
) -> Result<account::Model> {
    if amount <= Decimal::ZERO {
        return Err(Error::validation(format!(
            "top-up amount must be positive, got {amount}"
        )));
    }

    let txn = db.begin().await?;
    get_account(&txn, user_id).await?;
    post_ledger_entry(&txn, user_id, None, amount).await?;
    let account = get_account(&txn, user_id).await?;
    txn.commit().await?;

    info!(balance = %account.balance, "Balance increased");
    Ok(account)
}

/// Ledger entries of `user_id`, oldest first.
pub async fn list_payments<C>(db: &C, user_id: Uuid) -> Result<Vec<payment::Model>>
where
    C: ConnectionTrait,
{
    Payment::find()
        .filter(payment::Column::AccountId.eq(user_id))
        .order_by_asc(payment::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Balance reconstructed from the ledger: the sum of all entries of `user_id`.
pub async fn ledger_balance<C>(db: &C, user_id: Uuid) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    Ok(list_payments(db, user_id)
        .await?
        .iter()
        .map(|entry| entry.amount)
        .sum())
}
