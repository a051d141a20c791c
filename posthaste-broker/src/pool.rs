use crate::{
    broker::{Broker, Connection},
    client::{BrokerError, Result},
    session::timed,
};
use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};
use std::{sync::Arc, time::Duration};
use tracing::debug;

pub type ConnectionPool = Pool<ConnectionManager>;

/// Opens broker connections for the pool and weeds out closed ones on checkout.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, connect_timeout: Duration) -> Self {
        Self {
            broker,
            connect_timeout,
        }
    }
}

impl Manager for ConnectionManager {
    type Type = Box<dyn Connection>;
    type Error = BrokerError;

    async fn create(&self) -> Result<Box<dyn Connection>> {
        let connection = timed("connect", self.connect_timeout, self.broker.connect()).await?;
        debug!("Opened broker connection");

        Ok(connection)
    }

    async fn recycle(
        &self,
        connection: &mut Box<dyn Connection>,
        _metrics: &Metrics,
    ) -> RecycleResult<BrokerError> {
        if connection.is_open() {
            Ok(())
        } else {
            Err(RecycleError::Backend(BrokerError::ConnectionClosed))
        }
    }
}
