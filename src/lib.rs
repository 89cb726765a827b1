//! `LedgerRelay` - order and account services linked by a transactional outbox/inbox
//!
//! The order side writes an order and its `PaymentRequest` in one transaction; an
//! outbox relay publishes the request to the broker. The account side applies each
//! request at most once behind an inbox, debits the balance (or declines for
//! insufficient funds) and answers with a `PaymentResponse` through its own outbox.
//! The order side then settles the order as `Finished` or `Cancelled`.

// Deny the most critical lints that could lead to bugs or security issues
#![deny(
    // Security and correctness
    unsafe_code,
    unsafe_op_in_unsafe_fn,

    // Code quality - things that are almost always bugs
    unreachable_code,
    unreachable_patterns,
    unused_must_use,

    // Documentation - broken links are bugs
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
)]
// Warn on things that should be fixed but aren't necessarily bugs
#![warn(
    // Documentation - missing docs should be added gradually
    missing_docs,

    // Clippy categories for overall code quality
    clippy::all,
    clippy::pedantic,
    clippy::nursery,

    // Performance
    clippy::inefficient_to_string,
    clippy::large_types_passed_by_value,
    clippy::needless_pass_by_value,
    clippy::unnecessary_wraps,

    // Correctness
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::exit,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,

    // Complexity and readability
    clippy::cognitive_complexity,
    clippy::large_enum_variant,
    clippy::match_same_arms,
    clippy::too_many_lines,

    // Style consistency
    clippy::enum_glob_use,
    clippy::inconsistent_struct_constructor,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::redundant_closure_for_method_calls,
    clippy::semicolon_if_nothing_returned,
    clippy::wildcard_imports,

    // Future compatibility
    future_incompatible,
    rust_2018_idioms,
)]
// Allow some pedantic lints that are too noisy or not applicable
#![allow(
    clippy::module_name_repetitions,  // Common pattern in Rust
    clippy::missing_errors_doc,        // Will add gradually
    clippy::missing_panics_doc,        // Will add gradually
)]

/// Broker connector/channel traits, the owned broker session and its implementations
pub mod broker;
/// Configuration management for the store, the broker and the relay
pub mod config;
/// Inbound consumer session and the handler seam
pub mod consumer;
/// Core business logic - framework-agnostic order, account, payment, outbox and inbox operations
pub mod core;
/// SeaORM entity definitions for database tables
pub mod entities;
/// Unified error types and result handling
pub mod errors;
/// Queue handlers binding consumer sessions to core operations
pub mod handlers;
/// Wire envelopes exchanged over the broker
pub mod messages;
/// Outbox relay loop
pub mod relay;
/// Loop delays and the cooperative shutdown signal
pub mod scheduler;
/// Wiring of the order and payment services into background tasks
pub mod service;

#[cfg(test)]
pub mod test_utils;
