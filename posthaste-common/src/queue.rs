use std::{fmt::Display, time::Duration};

/// The queues events are handed off on.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Queue {
    Posts,
    PostsDeletion,
}

/// How long a queue keeps messages around for downstream consumers.
///
/// Once either bound is hit the oldest messages are dropped. `None` leaves that bound off.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct Retention {
    pub max_age: Option<Duration>,
    pub max_messages: Option<u64>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct QueueOptions {
    /// Whether the queue definition has to survive a broker restart.
    pub durable: bool,
    pub retention: Retention,
}

impl Queue {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Queue::Posts => "posts",
            Queue::PostsDeletion => "posts-deletion",
        }
    }

    /// Both queues are declared non-durable.
    #[must_use]
    pub fn options(self, retention: Retention) -> QueueOptions {
        QueueOptions {
            durable: false,
            retention,
        }
    }
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
