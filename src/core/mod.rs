//! Core business logic - framework-agnostic order, account and payment operations,
//! plus the outbox/inbox data access they are built on.
//!
//! Every operation takes a SeaORM connection or an open transaction and returns
//! [`crate::errors::Result`], so callers can tell business outcomes
//! (validation, not found, conflict) apart from store faults.

/// Account operations on the account side
pub mod account;
/// Inbox data access: deduplication of inbound deliveries
pub mod inbox;
/// Order creation, lookup and status transitions on the order side
pub mod order;
/// Outbox data access: enqueue, select pending, mark processed/failed
pub mod outbox;
/// Inbox-guarded payment transaction
pub mod payment;
