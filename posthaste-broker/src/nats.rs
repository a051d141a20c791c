//! NATS JetStream as the broker.
//!
//! Every queue is a stream of the same name, capturing the subject of the same name.
//! Non-durable queues use memory storage. Streams use limits retention bounded by the
//! declared maximum age and message count, so reading a message never removes it and the
//! server drops the oldest messages once a bound is hit. Downstream consumers bring their
//! own durable consumers.
//!
//! Snapshot reads use an ephemeral pull consumer without acknowledgements, created per
//! channel and queue and bounded by the number of messages it had pending when it was
//! created. Messages are fetched in batches. Closing the channel deletes those consumers.
//! If a channel is dropped without being closed the server removes them after the
//! inactivity threshold.

use crate::{
    broker::{Broker, Channel, Connection},
    client::{BrokerError, Result},
};
use async_nats::{
    Client, ConnectOptions,
    connection::State,
    jetstream::{
        self,
        consumer::{AckPolicy, DeliverPolicy, PullConsumer, pull},
        stream::{self, StorageType},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use posthaste_common::queue::{QueueOptions, Retention};
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "posthaste";
const SNAPSHOT_INACTIVE_THRESHOLD: Duration = Duration::from_secs(60);
const SNAPSHOT_BATCH: u64 = 256;

#[derive(Clone, Debug)]
pub struct NatsBroker {
    url: String,
    connect_timeout: Duration,
}

impl NatsBroker {
    #[must_use]
    pub fn new(url: String, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let client = ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(self.connect_timeout)
            .connect(self.url.as_str())
            .await
            .map_err(|err| BrokerError::Connect(err.to_string()))?;

        let server_info = client.server_info();
        info!(
            server_host = %server_info.host,
            server_version = %server_info.version,
            "Connected to NATS"
        );

        Ok(Box::new(NatsConnection { client }))
    }
}

struct NatsConnection {
    client: Client,
}

#[async_trait]
impl Connection for NatsConnection {
    async fn channel(&mut self) -> Result<Box<dyn Channel>> {
        if !self.is_open() {
            return Err(BrokerError::Channel(
                "NATS connection is not established".to_owned(),
            ));
        }

        Ok(Box::new(NatsChannel {
            context: jetstream::new(self.client.clone()),
            streams: HashMap::new(),
            snapshots: HashMap::new(),
        }))
    }

    fn is_open(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client.drain().await.map_err(|err| BrokerError::Close {
            resource: "connection",
            reason: err.to_string(),
        })
    }
}

struct NatsChannel {
    context: jetstream::Context,
    streams: HashMap<String, stream::Stream>,
    snapshots: HashMap<String, Snapshot>,
}

struct Snapshot {
    consumer: PullConsumer,
    remaining: u64,
    buffered: VecDeque<Bytes>,
}

/// Stream limits for `retention` in the server's notation, where a zero age and `-1`
/// messages mean unbounded.
fn stream_limits(retention: Retention) -> (Duration, i64) {
    let max_age = retention.max_age.unwrap_or(Duration::ZERO);
    let max_messages = retention
        .max_messages
        .map_or(-1, |max| i64::try_from(max).unwrap_or(i64::MAX));

    (max_age, max_messages)
}

fn retrieve_error(queue: &str, err: &dyn std::fmt::Display) -> BrokerError {
    BrokerError::Retrieve {
        queue: queue.to_owned(),
        reason: err.to_string(),
    }
}

impl NatsChannel {
    fn stream(&self, queue: &str) -> Result<&stream::Stream> {
        self.streams
            .get(queue)
            .ok_or_else(|| BrokerError::UndeclaredQueue(queue.to_owned()))
    }

    async fn open_snapshot(stream: &stream::Stream, queue: &str) -> Result<Snapshot> {
        let consumer: PullConsumer = stream
            .create_consumer(pull::Config {
                description: Some(format!("Snapshot read of {queue}")),
                deliver_policy: DeliverPolicy::All,
                ack_policy: AckPolicy::None,
                inactive_threshold: SNAPSHOT_INACTIVE_THRESHOLD,
                ..Default::default()
            })
            .await
            .map_err(|err| retrieve_error(queue, &err))?;

        let remaining = consumer.cached_info().num_pending;
        debug!(%queue, remaining, "Opened snapshot consumer");

        Ok(Snapshot {
            consumer,
            remaining,
            buffered: VecDeque::new(),
        })
    }

    async fn fetch_batch(snapshot: &mut Snapshot, queue: &str) -> Result<()> {
        let wanted = snapshot.remaining.min(SNAPSHOT_BATCH);

        let mut batch = snapshot
            .consumer
            .fetch()
            .max_messages(usize::try_from(wanted).unwrap_or(usize::MAX))
            .messages()
            .await
            .map_err(|err| retrieve_error(queue, &err))?;

        let mut received = 0_u64;
        while let Some(message) = batch.next().await {
            let message = message.map_err(|err| retrieve_error(queue, &err))?;
            snapshot.buffered.push_back(message.payload.clone());
            received += 1;
        }

        // A short batch means older messages expired since the consumer was created.
        snapshot.remaining = if received < wanted {
            0
        } else {
            snapshot.remaining - received
        };
        Ok(())
    }
}

#[async_trait]
impl Channel for NatsChannel {
    async fn declare_queue(&mut self, queue: &str, options: QueueOptions) -> Result<()> {
        let declare_error = |err: &dyn std::fmt::Display| BrokerError::Declare {
            queue: queue.to_owned(),
            reason: err.to_string(),
        };
        let (max_age, max_messages) = stream_limits(options.retention);

        let stream = match self.context.get_stream(queue).await {
            Ok(stream) => {
                let current = &stream.cached_info().config;
                if current.max_age == max_age && current.max_messages == max_messages {
                    stream
                } else {
                    info!(%queue, ?max_age, max_messages, "Updating stream retention");
                    let config = stream::Config {
                        max_age,
                        max_messages,
                        ..current.clone()
                    };
                    self.context
                        .update_stream(&config)
                        .await
                        .map_err(|err| declare_error(&err))?;
                    self.context
                        .get_stream(queue)
                        .await
                        .map_err(|err| declare_error(&err))?
                }
            }
            Err(_) => {
                debug!(%queue, durable = options.durable, "Creating stream");
                self.context
                    .create_stream(stream::Config {
                        name: queue.to_owned(),
                        subjects: vec![queue.to_owned()],
                        storage: if options.durable {
                            StorageType::File
                        } else {
                            StorageType::Memory
                        },
                        max_age,
                        max_messages,
                        ..Default::default()
                    })
                    .await
                    .map_err(|err| declare_error(&err))?
            }
        };

        self.streams.insert(queue.to_owned(), stream);
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: Bytes) -> Result<()> {
        self.stream(queue)?;
        let publish_error = |err: &dyn std::fmt::Display| BrokerError::Publish {
            queue: queue.to_owned(),
            reason: err.to_string(),
        };

        self.context
            .publish(queue.to_owned(), payload)
            .await
            .map_err(|err| publish_error(&err))?
            .await
            .map_err(|err| publish_error(&err))?;

        Ok(())
    }

    async fn retrieve_next(&mut self, queue: &str) -> Result<Option<Bytes>> {
        if !self.snapshots.contains_key(queue) {
            let snapshot = Self::open_snapshot(self.stream(queue)?, queue).await?;
            self.snapshots.insert(queue.to_owned(), snapshot);
        }
        let Some(snapshot) = self.snapshots.get_mut(queue) else {
            return Ok(None);
        };

        if snapshot.buffered.is_empty() && snapshot.remaining > 0 {
            Self::fetch_batch(snapshot, queue).await?;
        }

        Ok(snapshot.buffered.pop_front())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let NatsChannel {
            streams, snapshots, ..
        } = *self;
        let mut result = Ok(());

        for (queue, snapshot) in snapshots {
            let Some(stream) = streams.get(&queue) else {
                continue;
            };
            let name = &snapshot.consumer.cached_info().name;

            if let Err(err) = stream.delete_consumer(name).await {
                warn!(%queue, consumer = %name, error = %err, "Could not delete snapshot consumer");
                result = Err(BrokerError::Close {
                    resource: "channel",
                    reason: err.to_string(),
                });
            }
        }

        result
    }
}
