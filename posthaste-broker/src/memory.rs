//! A broker living entirely inside this process.
//!
//! Queues are never persisted, whatever the declared durability, but honor the declared
//! retention. Used for local runs without infrastructure and to observe the pipeline in
//! tests.

use crate::{
    broker::{Broker, Channel, Connection},
    client::{BrokerError, Result},
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use posthaste_common::queue::{Queue, QueueOptions, Retention};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::time::Instant;

#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

/// Counters of what happened on a [`MemoryBroker`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct MemoryStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub channels_opened: usize,
    pub channels_closed: usize,
    pub publishes: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, StoredQueue>,
    stats: MemoryStats,
    unreachable: bool,
    failing_publishes: bool,
    stalled_publishes: bool,
}

/// Retained messages of one queue. Every message gets the next sequence number, dropping
/// old messages advances `first_seq`.
#[derive(Debug, Default)]
struct StoredQueue {
    messages: VecDeque<StoredMessage>,
    first_seq: u64,
    retention: Retention,
}

#[derive(Debug)]
struct StoredMessage {
    stored_at: Instant,
    payload: Bytes,
}

impl StoredQueue {
    fn end_seq(&self) -> u64 {
        self.first_seq + u64::try_from(self.messages.len()).unwrap_or(u64::MAX)
    }

    fn push(&mut self, payload: Bytes) {
        self.messages.push_back(StoredMessage {
            stored_at: Instant::now(),
            payload,
        });
        self.prune();
    }

    fn get(&self, seq: u64) -> Option<&Bytes> {
        let index = usize::try_from(seq.checked_sub(self.first_seq)?).ok()?;
        self.messages.get(index).map(|message| &message.payload)
    }

    fn prune(&mut self) {
        let now = Instant::now();
        let Retention {
            max_age,
            max_messages,
        } = self.retention;

        while let Some(oldest) = self.messages.front() {
            let too_many = max_messages
                .is_some_and(|max| u64::try_from(self.messages.len()).unwrap_or(u64::MAX) > max);
            let too_old = max_age.is_some_and(|max| now.duration_since(oldest.stored_at) > max);
            if !too_many && !too_old {
                break;
            }

            self.messages.pop_front();
            self.first_seq += 1;
        }
    }
}

impl MemoryBroker {
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    /// Every payload `queue` still retains, oldest first.
    #[must_use]
    pub fn published(&self, queue: Queue) -> Vec<Bytes> {
        self.state
            .lock()
            .queues
            .get(queue.name())
            .map(|stored| {
                stored
                    .messages
                    .iter()
                    .map(|message| message.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().failing_publishes = fail;
    }

    /// Makes publishes hang forever.
    pub fn stall_publishes(&self, stall: bool) {
        self.state.lock().stalled_publishes = stall;
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(BrokerError::Connect("memory broker is unreachable".to_owned()));
        }
        state.stats.connections_opened += 1;

        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            open: true,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    open: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn channel(&mut self) -> Result<Box<dyn Channel>> {
        let mut state = self.broker.state.lock();
        if state.unreachable {
            self.open = false;
            return Err(BrokerError::Channel("memory broker is unreachable".to_owned()));
        }
        state.stats.channels_opened += 1;

        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            declared: HashSet::new(),
            cursors: HashMap::new(),
        }))
    }

    fn is_open(&self) -> bool {
        self.open && !self.broker.state.lock().unreachable
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.broker.state.lock().stats.connections_closed += 1;
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    declared: HashSet<String>,
    cursors: HashMap<String, Cursor>,
}

/// Sequence range of a snapshot read, bounded by the last message retained on the first read.
#[derive(Copy, Clone, Debug)]
struct Cursor {
    next: u64,
    end: u64,
}

impl MemoryChannel {
    fn ensure_declared(&self, queue: &str) -> Result<()> {
        if self.declared.contains(queue) {
            Ok(())
        } else {
            Err(BrokerError::UndeclaredQueue(queue.to_owned()))
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&mut self, queue: &str, options: QueueOptions) -> Result<()> {
        let mut state = self.broker.state.lock();
        let stored = state.queues.entry(queue.to_owned()).or_default();
        stored.retention = options.retention;
        stored.prune();
        drop(state);

        self.declared.insert(queue.to_owned());

        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: Bytes) -> Result<()> {
        self.ensure_declared(queue)?;

        let stalled = {
            let mut state = self.broker.state.lock();
            if state.failing_publishes {
                return Err(BrokerError::Publish {
                    queue: queue.to_owned(),
                    reason: "memory broker rejected the message".to_owned(),
                });
            }
            if !state.stalled_publishes {
                state.stats.publishes += 1;
                state.queues.entry(queue.to_owned()).or_default().push(payload);
            }
            state.stalled_publishes
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        Ok(())
    }

    async fn retrieve_next(&mut self, queue: &str) -> Result<Option<Bytes>> {
        self.ensure_declared(queue)?;

        let mut state = self.broker.state.lock();
        let Some(stored) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        stored.prune();

        let cursor = self.cursors.entry(queue.to_owned()).or_insert(Cursor {
            next: stored.first_seq,
            end: stored.end_seq(),
        });
        // Messages dropped by retention while reading are skipped.
        cursor.next = cursor.next.max(stored.first_seq);

        if cursor.next >= cursor.end {
            return Ok(None);
        }
        let message = stored.get(cursor.next).cloned();
        cursor.next += 1;

        Ok(message)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.broker.state.lock().stats.channels_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{broker::Broker, memory::MemoryBroker};
    use bytes::Bytes;
    use posthaste_common::queue::{Queue, Retention};
    use std::time::Duration;

    #[tokio::test]
    async fn snapshots_ignore_later_publishes() {
        let broker = MemoryBroker::default();
        let mut connection = broker.connect().await.unwrap();
        let mut reader = connection.channel().await.unwrap();
        let mut writer = connection.channel().await.unwrap();
        let queue = Queue::Posts.name();

        for channel in [&mut reader, &mut writer] {
            channel
                .declare_queue(queue, Queue::Posts.options(Retention::default()))
                .await
                .unwrap();
        }
        writer.publish(queue, Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(
            reader.retrieve_next(queue).await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
        writer.publish(queue, Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(reader.retrieve_next(queue).await.unwrap(), None);
        assert_eq!(broker.published(Queue::Posts).len(), 2);
    }

    #[tokio::test]
    async fn undeclared_queues_are_refused() {
        let broker = MemoryBroker::default();
        let mut connection = broker.connect().await.unwrap();
        let mut channel = connection.channel().await.unwrap();

        assert!(
            channel
                .publish(Queue::Posts.name(), Bytes::from_static(b"{}"))
                .await
                .is_err()
        );
        assert!(channel.retrieve_next(Queue::Posts.name()).await.is_err());
    }

    #[tokio::test]
    async fn message_cap_drops_the_oldest() {
        let broker = MemoryBroker::default();
        let mut connection = broker.connect().await.unwrap();
        let mut channel = connection.channel().await.unwrap();
        let queue = Queue::Posts.name();
        let retention = Retention {
            max_messages: Some(2),
            ..Retention::default()
        };

        channel
            .declare_queue(queue, Queue::Posts.options(retention))
            .await
            .unwrap();
        for payload in [b"1", b"2", b"3"] {
            channel.publish(queue, Bytes::from_static(payload)).await.unwrap();
        }

        assert_eq!(
            broker.published(Queue::Posts),
            [Bytes::from_static(b"2"), Bytes::from_static(b"3")]
        );
        assert_eq!(
            channel.retrieve_next(queue).await.unwrap(),
            Some(Bytes::from_static(b"2"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_are_gone_even_mid_read() {
        let broker = MemoryBroker::default();
        let mut connection = broker.connect().await.unwrap();
        let mut reader = connection.channel().await.unwrap();
        let queue = Queue::Posts.name();
        let retention = Retention {
            max_age: Some(Duration::from_secs(60)),
            ..Retention::default()
        };

        reader
            .declare_queue(queue, Queue::Posts.options(retention))
            .await
            .unwrap();
        reader.publish(queue, Bytes::from_static(b"old")).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        reader.publish(queue, Bytes::from_static(b"young")).await.unwrap();
        reader.publish(queue, Bytes::from_static(b"newest")).await.unwrap();

        assert_eq!(
            reader.retrieve_next(queue).await.unwrap(),
            Some(Bytes::from_static(b"old"))
        );
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            reader.retrieve_next(queue).await.unwrap(),
            Some(Bytes::from_static(b"young"))
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(reader.retrieve_next(queue).await.unwrap(), None);
        assert!(broker.published(Queue::Posts).is_empty());
    }
}
