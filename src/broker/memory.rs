//! In-process broker with AMQP-like queue semantics.
//!
//! Queues hold ready messages in FIFO order. A delivery stays unacknowledged until
//! the consuming channel acks or nacks it; when the channel goes away (closed,
//! dropped, or cut off by [`InMemoryBroker::drop_connections`]) its unacknowledged
//! messages return to the head of their queue flagged as redelivered.
//!
//! The broker can be switched off with [`InMemoryBroker::set_available`] to
//! simulate an outage: connecting fails and open channels stop working.

use super::{BrokerChannel, BrokerConnector, Delivery};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Queue {
    durable: bool,
    ready: VecDeque<Message>,
    /// delivery tag -> (channel id, message)
    unacked: HashMap<u64, (u64, Message)>,
    published: Vec<Vec<u8>>,
}

impl Queue {
    fn push(&mut self, payload: &[u8]) {
        self.ready.push_back(Message {
            payload: payload.to_vec(),
            redelivered: false,
        });
        self.published.push(payload.to_vec());
    }

    /// Returns the unacked messages matching `owned_by` to the head of the queue,
    /// keeping their original delivery order.
    fn requeue_where(&mut self, owned_by: impl Fn(u64) -> bool) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, (channel, _))| owned_by(*channel))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in &tags {
            if let Some((_, mut message)) = self.unacked.remove(tag) {
                message.redelivered = true;
                self.ready.push_front(message);
            }
        }
        tags.len()
    }
}

#[derive(Debug, Default)]
struct State {
    down: bool,
    generation: u64,
    next_channel_id: u64,
    next_delivery_tag: u64,
    connects: usize,
    queues: HashMap<String, Queue>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
}

/// Shared in-memory broker. Clones refer to the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates an available broker without queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches the broker on or off. Going down also severs every open channel.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state();
        state.down = !available;
        if !available {
            Self::sever(&mut state);
        }
        drop(state);
        self.inner.changed.notify_waiters();
    }

    /// Severs every open channel, as if the broker connection had been lost.
    pub fn drop_connections(&self) {
        Self::sever(&mut self.state());
        self.inner.changed.notify_waiters();
    }

    fn sever(state: &mut State) {
        state.generation += 1;
        for queue in state.queues.values_mut() {
            queue.requeue_where(|_| true);
        }
    }

    /// Puts a message on `queue` as if another service had published it.
    pub fn inject(&self, queue: &str, payload: &[u8]) {
        self.state()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(payload);
        self.inner.changed.notify_waiters();
    }

    /// Every payload ever published to `queue`, in publish order.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.published.clone())
            .unwrap_or_default()
    }

    /// Messages waiting on `queue` to be delivered.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered from `queue` and not yet acknowledged.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Number of successful connects since the broker was created.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Whether `queue` has been declared durable.
    #[must_use]
    pub fn is_durable(&self, queue: &str) -> bool {
        self.state().queues.get(queue).is_some_and(|q| q.durable)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Channel = MemoryChannel;

    async fn connect(&self) -> Result<MemoryChannel> {
        let mut state = self.state();
        if state.down {
            return Err(Error::broker("connection refused: in-memory broker is down"));
        }
        state.connects += 1;
        state.next_channel_id += 1;
        Ok(MemoryChannel {
            broker: self.clone(),
            id: state.next_channel_id,
            generation: state.generation,
            prefetch: None,
            consuming: None,
        })
    }
}

/// Channel on an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemoryChannel {
    broker: InMemoryBroker,
    id: u64,
    generation: u64,
    prefetch: Option<u16>,
    consuming: Option<String>,
}

impl MemoryChannel {
    fn open_state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.broker.state();
        if state.down || state.generation != self.generation {
            return Err(Error::broker("connection to in-memory broker lost"));
        }
        Ok(state)
    }

    fn try_next(&self) -> Option<Result<Option<Delivery>>> {
        let mut state = match self.open_state() {
            Ok(state) => state,
            Err(err) => return Some(Err(err)),
        };
        let Some(queue_name) = self.consuming.as_deref() else {
            return Some(Err(Error::broker("channel has no active subscription")));
        };

        let tag = state.next_delivery_tag + 1;
        let queue = state.queues.get_mut(queue_name)?;
        if let Some(limit) = self.prefetch {
            let in_flight = queue
                .unacked
                .values()
                .filter(|(channel, _)| *channel == self.id)
                .count();
            if in_flight >= usize::from(limit) {
                return None;
            }
        }

        let message = queue.ready.pop_front()?;
        let delivery = Delivery {
            delivery_tag: tag,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        queue.unacked.insert(tag, (self.id, message));
        state.next_delivery_tag = tag;
        Some(Ok(Some(delivery)))
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let mut state = self.open_state()?;
        let settled = state.queues.values_mut().find_map(|queue| {
            let owned = queue
                .unacked
                .get(&delivery_tag)
                .is_some_and(|(channel, _)| *channel == self.id);
            if !owned {
                return None;
            }
            queue
                .unacked
                .remove(&delivery_tag)
                .map(|(_, message)| (queue, message))
        });
        let Some((queue, mut message)) = settled else {
            return Err(Error::broker(format!("unknown delivery tag {delivery_tag}")));
        };
        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        drop(state);
        self.broker.inner.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open_state().is_ok()
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<()> {
        self.open_state()?
            .queues
            .entry(queue.to_string())
            .or_default()
            .durable = true;
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<()> {
        drop(self.open_state()?);
        self.prefetch = Some(count);
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<()> {
        self.open_state()?
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::broker(format!("no queue '{queue}' declared")))?
            .push(payload);
        self.broker.inner.changed.notify_waiters();
        Ok(())
    }

    async fn start_consuming(&mut self, queue: &str, _consumer_tag: &str) -> Result<()> {
        if !self.open_state()?.queues.contains_key(queue) {
            return Err(Error::broker(format!("no queue '{queue}' declared")));
        }
        self.consuming = Some(queue.to_string());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        loop {
            // Registered before checking so a change in between is not missed
            let changed = self.broker.inner.changed.notified();
            if let Some(result) = self.try_next() {
                return result;
            }
            changed.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.settle(delivery_tag, false)
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.settle(delivery_tag, requeue)
    }

    async fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut state = self.broker.state();
        let id = self.id;
        let requeued: usize = state
            .queues
            .values_mut()
            .map(|queue| queue.requeue_where(|channel| channel == id))
            .sum();
        drop(state);
        if requeued > 0 {
            self.broker.inner.changed.notify_waiters();
        }
    }
}
