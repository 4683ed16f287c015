//! A concurrent, bounded pool of long-lived application worker processes.
//!
//! Clients request a session for a given application root; the pool routes each
//! session to an existing worker when possible, spawns one in the background when
//! demand warrants, evicts idle or overloaded workers, and enforces global and
//! per-group capacity limits. The spawn engine that starts worker processes and the
//! session transport that talks to them are supplied by the embedder through the
//! [`SpawnEngine`] and [`Worker`] traits; this crate owns only the pool state machine
//! around them.

mod admin;
mod cleaner;
mod error;
mod group;
mod ids;
mod list;
mod options;
mod pool;
mod restart;
mod spawner;
mod worker;

pub use admin::{GroupSnapshot, PoolSnapshot, WorkerSnapshot};
pub use error::PoolError;
pub use ids::GroupKey;
pub use options::{PoolConfig, PoolOptions};
pub use pool::{CheckedOutSession, Pool};
pub use worker::{Session, SpawnEngine, SpawnError, Worker};
