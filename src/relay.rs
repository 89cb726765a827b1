//! Outbox relay - moves committed outbox rows onto the broker.
//!
//! Every cycle selects a bounded batch of pending rows, oldest first, and handles
//! each row on its own: decode, publish, mark processed. A row that fails keeps
//! `processed_at` empty and gets its error recorded, so the next cycle retries it
//! without holding up the rest of the batch.
//!
//! Delivery is at least once. A crash (or a failed store write) between a publish
//! and its `processed_at` update republishes the row later; receivers deduplicate
//! on the envelope's message id.

use crate::{
    broker::{BrokerConnector, BrokerSession},
    config::{MessageBusSettings, RelaySettings},
    core::outbox,
    entities::OutboxMessageModel,
    errors::Result,
    messages::Envelope,
    scheduler::{Scheduler, Shutdown},
};
use sea_orm::DatabaseConnection;
use std::marker::PhantomData;
use tracing::{debug, error, info, instrument, warn};

/// Counts for one relay cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayCycle {
    /// Pending rows picked up by the cycle
    pub selected: usize,
    /// Rows published and marked processed
    pub published: usize,
    /// Rows left pending with an error recorded
    pub failed: usize,
}

/// Relays outbox rows carrying `M` envelopes to one queue.
pub struct OutboxRelay<C: BrokerConnector, M: Envelope> {
    db: DatabaseConnection,
    session: BrokerSession<C>,
    queue: String,
    settings: RelaySettings,
    _message: PhantomData<fn() -> M>,
}

impl<C: BrokerConnector, M: Envelope> OutboxRelay<C, M> {
    /// Creates a relay that publishes to `queue`, declaring it on every connect.
    pub fn new(
        db: DatabaseConnection,
        connector: C,
        bus: &MessageBusSettings,
        queue: impl Into<String>,
        settings: RelaySettings,
    ) -> Self {
        let queue = queue.into();
        Self {
            db,
            session: BrokerSession::new(connector, bus, vec![queue.clone()]),
            queue,
            settings,
            _message: PhantomData,
        }
    }

    /// Runs one cycle over at most `batch_size` pending rows.
    ///
    /// Only a failure to read the pending rows is returned as an error; per-row
    /// failures are recorded on the rows and counted in [`RelayCycle::failed`].
    pub async fn run_cycle(&mut self) -> Result<RelayCycle> {
        let rows = outbox::fetch_pending(&self.db, self.settings.batch_size).await?;
        let mut cycle = RelayCycle {
            selected: rows.len(),
            ..RelayCycle::default()
        };

        for row in &rows {
            match self.relay_row(row).await {
                Ok(()) => cycle.published += 1,
                Err(err) => {
                    cycle.failed += 1;
                    warn!(outbox_id = row.id, error = %err, "Outbox row not relayed");
                    if let Err(record_err) =
                        outbox::record_failure(&self.db, row.id, &err.to_string()).await
                    {
                        warn!(outbox_id = row.id, error = %record_err, "Could not record relay failure");
                    }
                }
            }
        }

        Ok(cycle)
    }

    async fn relay_row(&mut self, row: &OutboxMessageModel) -> Result<()> {
        let envelope = M::from_json(row.payload.as_bytes())?;
        self.session
            .publish(&self.queue, envelope.to_json()?.as_bytes())
            .await?;

        match outbox::mark_processed(&self.db, row.id).await {
            Ok(true) => {
                debug!(
                    outbox_id = row.id,
                    kind = M::KIND,
                    message_id = %envelope.message_id(),
                    "Envelope published"
                );
                Ok(())
            }
            Ok(false) => {
                debug!(outbox_id = row.id, "Outbox row was already processed");
                Ok(())
            }
            Err(err) => {
                warn!(
                    outbox_id = row.id,
                    message_id = %envelope.message_id(),
                    "Published but not marked processed; the envelope will be sent again"
                );
                Err(err)
            }
        }
    }

    /// Runs cycles every `poll_interval` until shutdown, then closes the session.
    #[instrument(name = "outbox_relay", skip_all, fields(queue = %self.queue, kind = M::KIND))]
    pub async fn run<S: Scheduler>(mut self, scheduler: S, mut shutdown: Shutdown) {
        info!("Outbox relay started");

        while !shutdown.is_triggered() {
            match self.run_cycle().await {
                Ok(cycle) if cycle.selected > 0 => info!(
                    selected = cycle.selected,
                    published = cycle.published,
                    failed = cycle.failed,
                    "Relay cycle finished"
                ),
                Ok(_) => debug!("No pending outbox rows"),
                Err(err) => error!(error = %err, "Relay cycle failed"),
            }

            if !scheduler
                .sleep(self.settings.poll_interval, &mut shutdown)
                .await
            {
                break;
            }
        }

        self.session.close().await;
        info!("Outbox relay stopped");
    }
}
