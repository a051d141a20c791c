use crate::{
    broker::Channel,
    client::{BrokerError, Result},
};
use bytes::Bytes;
use posthaste_common::queue::{Queue, Retention};
use serde::de::DeserializeOwned;
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

pub(crate) async fn timed<T>(
    operation: &'static str,
    timeout: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| BrokerError::Timeout { operation, timeout })?
}

/// One open channel, valid for a single publish or drain.
///
/// Every call on the channel is bounded by the client's timeout.
pub struct Session {
    channel: Box<dyn Channel>,
    timeout: Duration,
    retention: Retention,
}

impl Session {
    pub(crate) fn new(channel: Box<dyn Channel>, timeout: Duration, retention: Retention) -> Self {
        Self {
            channel,
            timeout,
            retention,
        }
    }

    pub async fn declare(&mut self, queue: Queue) -> Result<()> {
        timed(
            "declare",
            self.timeout,
            self.channel
                .declare_queue(queue.name(), queue.options(self.retention)),
        )
        .await
    }

    pub async fn publish(&mut self, queue: Queue, payload: Bytes) -> Result<()> {
        let size = payload.len();
        timed(
            "publish",
            self.timeout,
            self.channel.publish(queue.name(), payload),
        )
        .await?;

        debug!(%queue, size, "Message sent");
        Ok(())
    }

    /// Retrieves messages until the channel reports the queue empty.
    ///
    /// Messages that do not decode as `T` are logged and left out.
    pub async fn drain<T>(&mut self, queue: Queue) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut messages = Vec::new();
        let mut skipped = 0_usize;

        while let Some(payload) = timed(
            "retrieve",
            self.timeout,
            self.channel.retrieve_next(queue.name()),
        )
        .await?
        {
            match serde_json::from_slice(&payload) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    skipped += 1;
                    warn!(%queue, error = %err, size = payload.len(), "Skipping undecodable message");
                }
            }
        }

        debug!(%queue, count = messages.len(), skipped, "Queue drained");
        Ok(messages)
    }

    pub(crate) async fn close(self) -> Result<()> {
        timed("close channel", self.timeout, self.channel.close()).await
    }
}
