//! Entity module - Contains the SeaORM entity definitions for both ledger stores.
//!
//! The order store holds `orders` and `outbox_messages`; the account store holds
//! `accounts`, `payments`, `inbox_messages` and its own `outbox_messages`.
//! Each service owns its store and no table references the other service.

pub mod account;
pub mod inbox_message;
pub mod order;
pub mod outbox_message;
pub mod payment;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use inbox_message::{
    Column as InboxMessageColumn, Entity as InboxMessage, Model as InboxMessageModel,
};
pub use order::{Column as OrderColumn, Entity as Order, Model as OrderModel, OrderStatus};
pub use outbox_message::{
    Column as OutboxMessageColumn, Entity as OutboxMessage, Model as OutboxMessageModel,
};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel};
