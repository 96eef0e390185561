mod memory;
mod pooled;
mod redis;

use crate::generator::Operation;
use anyhow::Result;
use clap::ValueEnum;
use std::sync::Arc;

pub use self::memory::MemoryConnector;
pub use self::pooled::{ConnectError, StoreManager};
pub use self::redis::RedisConnector;

/// One logical connection to the store under test.
///
/// Transport and store-side errors are returned as-is; the harness treats them as fatal.
pub trait Store: Send {
    /// Returns whether the key was present.
    fn get(&mut self, key: u64) -> Result<bool>;
    fn set(&mut self, key: u64, value: &[u8]) -> Result<()>;
    fn flush_all(&mut self) -> Result<()>;
    /// Submits `ops` in one round trip. Replies come back in submission order.
    fn execute_batch(&mut self, ops: &[Operation], mode: BatchMode) -> Result<()>;

    /// Sends `op` without waiting for its reply.
    fn submit(&mut self, op: Operation) -> Result<()>;
    /// Blocks until the reply to the oldest submitted operation arrives.
    fn complete(&mut self) -> Result<()>;

    fn apply(&mut self, op: Operation) -> Result<()> {
        match op {
            Operation::Get(key) => self.get(key).map(|_| ()),
            Operation::Set(key, value) => self.set(key, value),
        }
    }
}

/// Opens brand-new connections. Strategies never create connections any other way.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Store>>;
    fn describe(&self) -> String;
    /// An owned handle opening connections to the same place, for pools that outlive a borrow.
    fn share(&self) -> Arc<dyn Connector>;

    /// Backend-side counters worth logging after a run, if the backend keeps any.
    fn report(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Wrapped in MULTI/EXEC
    Transaction,
    /// Plain pipeline, no cross-command atomicity
    Pipeline,
}

/// How replies are decoded on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Replies are checked and dropped without building values.
    #[default]
    Fast,
    /// Every reply is materialised into an owned value tree and payloads are copied out.
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
// Update store::get_connector when adding new variation
pub enum Backend {
    Redis,
    Memory,
}

/// Where connections go. Turned into a [`Connector`] per run so each run picks its codec.
#[derive(Debug, Clone)]
pub struct Target {
    pub backend: Backend,
    pub host: String,
    pub port: u16,
}

pub fn get_connector(target: &Target, codec: Codec) -> Result<Arc<dyn Connector>> {
    match target.backend {
        Backend::Redis => Ok(Arc::new(RedisConnector::new(
            &target.host,
            target.port,
            codec,
        )?)),
        Backend::Memory => Ok(Arc::new(MemoryConnector::new(codec))),
    }
}
