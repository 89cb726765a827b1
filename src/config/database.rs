//! Ledger store connection and table creation.
//!
//! Each service owns its own store. The order side needs `orders` and
//! `outbox_messages`; the account side needs `accounts`, `payments`,
//! `inbox_messages` and `outbox_messages`. Tables are generated from the entity
//! definitions with `Schema::create_table_from_entity`, so the schema always
//! matches the Rust models (including the unique index on inbox message ids).

use crate::entities::{Account, InboxMessage, Order, OutboxMessage, Payment};
use crate::errors::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};
use tracing::{debug, info, instrument};

/// Opens a connection pool to the store at `database_url`.
#[instrument]
pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to ledger store");
    let mut options = ConnectOptions::new(database_url.to_owned());
    options.sqlx_logging(false);
    let db = Database::connect(options).await?;
    info!("Ledger store connection established");
    Ok(db)
}

async fn create_table<C, E>(db: &C, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates the order-side tables if they do not exist yet.
#[instrument(skip(db))]
pub async fn create_order_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Order).await?;
    create_table(db, OutboxMessage).await?;
    info!("Order store tables ensured");
    Ok(())
}

/// Creates the account-side tables if they do not exist yet.
#[instrument(skip(db))]
pub async fn create_payment_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Account).await?;
    create_table(db, Payment).await?;
    create_table(db, InboxMessage).await?;
    create_table(db, OutboxMessage).await?;
    info!("Account store tables ensured");
    Ok(())
}
