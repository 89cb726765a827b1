//! Order entity - An order placed by a user and settled asynchronously by the account side.
//!
//! Status starts at `New` and moves once to a terminal value when the
//! matching `PaymentResponse` arrives.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// Stored as an integer so the column matches the numeric enum the HTTP surface exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum OrderStatus {
    /// Created, payment not settled yet
    #[sea_orm(num_value = 0)]
    New,
    /// Payment succeeded
    #[sea_orm(num_value = 1)]
    Finished,
    /// Payment was declined
    #[sea_orm(num_value = 2)]
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// Maps a payment outcome to the status it settles the order into.
    #[must_use]
    pub const fn from_payment_success(success: bool) -> Self {
        if success { Self::Finished } else { Self::Cancelled }
    }
}

/// Order database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Order identifier, also carried in the payment envelopes
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// User who placed the order
    pub user_id: Uuid,
    /// Amount to charge, always positive
    pub amount: Decimal,
    /// Free-form description supplied by the user
    pub description: String,
    /// Current status
    pub status: OrderStatus,
}

/// `Order` has no relationships; outbox rows reference it only through their payload
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
