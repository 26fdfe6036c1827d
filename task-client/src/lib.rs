//! # task-client
//!
//! Async runtime for relaytask's persistent task queue.
//!
//! Applications enqueue work (outgoing messages, receipts, incoming messages,
//! multi-device sync transactions) on a [`TaskManager`]. The manager persists
//! every persistent task before accepting it, runs tasks one at a time in
//! FIFO order per lane (incoming and outgoing), and resumes both queues after
//! a restart.
//!
//! ## Features
//!
//! - **Persisted Queue**: SQLite task store, restart-safe FIFO order
//! - **Relay Client**: outgoing messages with per-receiver acknowledgements
//! - **Mediator Client**: reflection and lock/unlock transactions for sibling devices
//! - **Access Coordination**: one process owns the connection at a time
//! - **Transport Abstraction**: pluggable transport layer (mock included)
//!
//! ## Example
//!
//! ```ignore
//! use relaytask_client::{Config, SqliteTaskStore, TaskManager};
//!
//! let config = Config::from_file("relaytask.toml".as_ref())?;
//! let store = SqliteTaskStore::new(&config.queue.store_path).await?;
//! let manager = Arc::new(TaskManager::new(
//!     context,
//!     Arc::new(store),
//!     config.retry.policy(),
//!     config.queue.capacity,
//! ));
//! manager.load().await?;
//! Arc::clone(&manager).spawn_worker();
//!
//! let handle = manager.enqueue(definition).await?;
//! handle.wait().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod manager;
pub mod mediator;
pub mod mock;
pub mod store;
pub mod transport;

pub use access::{AccessCoordinator, BroadcastChannel, LocalBroadcast};
pub use chat::ChatClient;
pub use config::{AccessConfig, Config, ConfigError, ExecutionConfig, QueueConfig, RetryConfig};
pub use context::{
    AccountProvider, ContactStatus, EntityRepository, GroupManager, MessageProcessor,
    ProcessError, ProcessedIncoming, ReflectedOutcome, RepositoryError, TaskContext,
};
pub use error::{Disposition, ManagerError, TaskError, TransactionError};
pub use execution::{Execute, ExecuteTask};
pub use manager::{TaskHandle, TaskManager};
pub use mediator::{MediatorClient, MediatorSettings};
pub use store::{MemoryTaskStore, SqliteTaskStore, StoreError, StoredTask, TaskStore};
pub use transport::{Transport, TransportError};
