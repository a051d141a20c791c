pub mod broker;
pub mod client;
pub mod memory;
pub mod nats;
pub mod pool;
pub mod session;
