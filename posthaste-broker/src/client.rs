use crate::{
    broker::{Broker, Connection},
    memory::MemoryBroker,
    nats::NatsBroker,
    pool::{ConnectionManager, ConnectionPool},
    session::{Session, timed},
};
use bytes::Bytes;
use deadpool::managed::{Object, PoolError};
use futures::future::BoxFuture;
use posthaste_common::queue::{Queue, Retention};
use serde::{Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Unsupported broker url: {0}")]
    UnsupportedUrl(String),
    #[error("Could not connect to the broker: {0}")]
    Connect(String),
    #[error("The broker connection is closed")]
    ConnectionClosed,
    #[error("Could not open a broker channel: {0}")]
    Channel(String),
    #[error("Could not declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },
    #[error("Queue '{0}' was not declared on this channel")]
    UndeclaredQueue(String),
    #[error("Could not publish to queue '{queue}': {reason}")]
    Publish { queue: String, reason: String },
    #[error("Could not retrieve from queue '{queue}': {reason}")]
    Retrieve { queue: String, reason: String },
    #[error("Could not close the broker {resource}: {reason}")]
    Close {
        resource: &'static str,
        reason: String,
    },
    #[error("Broker operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("Connection pool error: {0}")]
    Pool(String),
    #[error("Event could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Whether the connection the error happened on should be closed instead of reused.
    #[must_use]
    pub fn poisons_connection(&self) -> bool {
        !matches!(
            self,
            BrokerError::Serialization(_) | BrokerError::UndeclaredQueue(_)
        )
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct BrokerConfig {
    pub url: String,
    pub pool_size: usize,
    /// Upper bound for every single broker call.
    pub timeout: Duration,
    pub retention: Retention,
}

/// Hands events to the broker and reads queue backlogs back.
///
/// Connections are pooled. Each operation checks one out, works on a fresh channel and
/// closes that channel again before the connection goes back into the pool. A connection
/// that saw a broker failure is closed instead of being returned.
#[derive(Clone)]
pub struct BrokerClient {
    pool: ConnectionPool,
    timeout: Duration,
    retention: Retention,
}

impl BrokerClient {
    pub fn new(broker: Arc<dyn Broker>, pool_size: usize, timeout: Duration) -> Result<Self> {
        let pool = ConnectionPool::builder(ConnectionManager::new(broker, timeout))
            .max_size(pool_size)
            .build()
            .map_err(|err| BrokerError::Pool(err.to_string()))?;

        Ok(Self {
            pool,
            timeout,
            retention: Retention::default(),
        })
    }

    /// Bounds what the queues keep once they are declared by this client.
    #[must_use]
    pub fn with_retention(self, retention: Retention) -> Self {
        Self { retention, ..self }
    }

    /// Builds a client for the broker named by `config.url`.
    ///
    /// `nats://` and `tls://` urls connect to a NATS server with JetStream enabled,
    /// `memory://` keeps every queue inside this process.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let broker: Arc<dyn Broker> = if config.url.starts_with("memory://") {
            Arc::new(MemoryBroker::default())
        } else if config.url.starts_with("nats://") || config.url.starts_with("tls://") {
            Arc::new(NatsBroker::new(config.url.clone(), config.timeout))
        } else {
            return Err(BrokerError::UnsupportedUrl(config.url.clone()));
        };

        Ok(Self::new(broker, config.pool_size, config.timeout)?.with_retention(config.retention))
    }

    /// Publishes `event` on `queue`, declaring the queue first.
    #[instrument(skip_all, fields(%queue))]
    pub async fn publish<T>(&self, queue: Queue, event: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = Bytes::from(serde_json::to_vec(event)?);

        self.with_session(move |session| {
            Box::pin(async move {
                session.declare(queue).await?;
                session.publish(queue, payload).await
            })
        })
        .await
    }

    /// Returns a snapshot of everything currently waiting on `queue`, oldest first.
    ///
    /// Nothing is acknowledged or removed. Calling this twice without publishes in between
    /// yields the same messages.
    #[instrument(skip_all, fields(%queue))]
    pub async fn drain<T>(&self, queue: Queue) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.with_session(move |session| {
            Box::pin(async move {
                session.declare(queue).await?;
                session.drain(queue).await
            })
        })
        .await
    }

    /// Checks out a connection and opens and closes a channel on it.
    pub async fn check(&self) -> Result<()> {
        self.with_session(|_| Box::pin(async { Ok(()) })).await
    }

    async fn with_session<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>> + Send,
    {
        debug!("Connecting");
        let mut connection = self.checkout().await?;

        let opened = timed("open channel", self.timeout, connection.channel()).await;
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                self.discard(connection).await;
                return Err(err);
            }
        };

        debug!("Ready");
        let mut session = Session::new(channel, self.timeout, self.retention);
        let outcome = operation(&mut session).await;

        debug!("Closing");
        let closed = session.close().await;

        let poisoned = outcome.as_ref().err().is_some_and(BrokerError::poisons_connection);
        match closed {
            Ok(()) if !poisoned => {}
            Ok(()) => self.discard(connection).await,
            Err(err) => {
                warn!(error = %err, "Closing the broker channel failed");
                self.discard(connection).await;
            }
        }

        outcome
    }

    async fn checkout(&self) -> Result<Object<ConnectionManager>> {
        timed("checkout", self.timeout, async {
            self.pool.get().await.map_err(|err| match err {
                PoolError::Backend(err) => err,
                other => BrokerError::Pool(other.to_string()),
            })
        })
        .await
    }

    /// Takes a connection out of the pool for good and closes it.
    async fn discard(&self, connection: Object<ConnectionManager>) {
        let connection: Box<dyn Connection> = Object::take(connection);

        if let Err(err) = timed("close connection", self.timeout, connection.close()).await {
            warn!(error = %err, "Closing a discarded broker connection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::{BrokerClient, BrokerConfig, BrokerError},
        memory::MemoryBroker,
    };
    use posthaste_common::queue::{Queue, Retention};
    use serde::{Deserialize, Serialize};
    use std::{sync::Arc, time::Duration};

    #[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    fn client(broker: &MemoryBroker) -> BrokerClient {
        BrokerClient::new(Arc::new(broker.clone()), 2, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn draining_an_empty_queue_terminates() {
        let broker = MemoryBroker::default();

        let messages: Vec<Ping> = client(&broker).drain(Queue::Posts).await.unwrap();

        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn drain_is_a_repeatable_snapshot_in_publish_order() {
        let broker = MemoryBroker::default();
        let client = client(&broker);

        for n in 0..5 {
            client.publish(Queue::Posts, &Ping { n }).await.unwrap();
        }

        let first: Vec<Ping> = client.drain(Queue::Posts).await.unwrap();
        let second: Vec<Ping> = client.drain(Queue::Posts).await.unwrap();

        assert_eq!(first, (0..5).map(|n| Ping { n }).collect::<Vec<_>>());
        assert_eq!(first, second);
        assert_eq!(broker.published(Queue::Posts).len(), 5);
    }

    #[tokio::test]
    async fn undecodable_messages_are_left_out_of_drains() {
        let broker = MemoryBroker::default();
        let client = client(&broker);

        client.publish(Queue::Posts, &Ping { n: 1 }).await.unwrap();
        client.publish(Queue::Posts, "not a ping").await.unwrap();
        client.publish(Queue::Posts, &Ping { n: 2 }).await.unwrap();

        let messages: Vec<Ping> = client.drain(Queue::Posts).await.unwrap();

        assert_eq!(messages, [Ping { n: 1 }, Ping { n: 2 }]);
        assert_eq!(broker.published(Queue::Posts).len(), 3);
    }

    #[tokio::test]
    async fn retention_applies_to_declared_queues() {
        let broker = MemoryBroker::default();
        let client = client(&broker).with_retention(Retention {
            max_messages: Some(3),
            ..Retention::default()
        });

        for n in 0..5 {
            client.publish(Queue::Posts, &Ping { n }).await.unwrap();
        }

        let messages: Vec<Ping> = client.drain(Queue::Posts).await.unwrap();
        assert_eq!(messages, (2..5).map(|n| Ping { n }).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn queues_are_kept_apart() {
        let broker = MemoryBroker::default();
        let client = client(&broker);

        client.publish(Queue::PostsDeletion, &Ping { n: 1 }).await.unwrap();

        let posts: Vec<Ping> = client.drain(Queue::Posts).await.unwrap();
        assert!(posts.is_empty());
        assert_eq!(broker.published(Queue::PostsDeletion).len(), 1);
    }

    #[tokio::test]
    async fn connections_are_reused_and_channels_closed() {
        let broker = MemoryBroker::default();
        let client = client(&broker);

        client.publish(Queue::Posts, &Ping { n: 1 }).await.unwrap();
        client.publish(Queue::Posts, &Ping { n: 2 }).await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.channels_opened, 2);
        assert_eq!(stats.channels_closed, 2);
    }

    #[tokio::test]
    async fn failed_publishes_close_channel_and_connection() {
        let broker = MemoryBroker::default();
        let client = client(&broker);
        broker.fail_publishes(true);

        let err = client.publish(Queue::Posts, &Ping { n: 1 }).await.unwrap_err();

        assert!(matches!(err, BrokerError::Publish { .. }));
        let stats = broker.stats();
        assert_eq!(stats.channels_opened, stats.channels_closed);
        assert_eq!(stats.connections_opened, stats.connections_closed);

        broker.fail_publishes(false);
        client.publish(Queue::Posts, &Ping { n: 2 }).await.unwrap();
        assert_eq!(broker.stats().connections_opened, 2);
    }

    #[tokio::test]
    async fn unreachable_broker_is_an_error() {
        let broker = MemoryBroker::default();
        broker.set_reachable(false);

        let err = client(&broker).check().await.unwrap_err();

        assert!(matches!(err, BrokerError::Connect(_)));
        assert_eq!(broker.stats().connections_opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_publishes_time_out_and_release_everything() {
        let broker = MemoryBroker::default();
        let client = client(&broker);
        broker.stall_publishes(true);

        let err = client.publish(Queue::Posts, &Ping { n: 1 }).await.unwrap_err();

        assert!(matches!(
            err,
            BrokerError::Timeout {
                operation: "publish",
                ..
            }
        ));
        let stats = broker.stats();
        assert_eq!(stats.channels_opened, stats.channels_closed);
        assert_eq!(stats.connections_opened, stats.connections_closed);
    }

    #[test]
    fn unknown_url_schemes_are_rejected() {
        let config = BrokerConfig {
            url: "amqp://localhost".to_owned(),
            pool_size: 1,
            timeout: Duration::from_secs(1),
            retention: Retention::default(),
        };

        assert!(matches!(
            BrokerClient::from_config(&config),
            Err(BrokerError::UnsupportedUrl(_))
        ));
    }
}
