//! Refresh/poll coordination core for the cadet broker: a versioned in-memory
//! store, refresh and long-poll waiter registries, and a debounced reference
//! graph scheduler.

pub mod broker;
pub mod config;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod models;
pub mod o11y;
pub mod store;
pub mod waiters;

pub use broker::{Broker, BrokerStats};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use graph::{
    ComponentGraphBuilder, GraphBuilder, GraphEdge, GraphInput, GraphRefreshScheduler,
    ReferenceGraph,
};
pub use ingest::{ApplyOutcome, Card, CardContent, IngestEvent, WorkerCommand};
pub use models::{CARD_TABLES, Category, DATA_TABLES, EntityKeys, Table, Version};
pub use store::{Snapshot, VersionedStore};
pub use waiters::{Delivery, PollDelivery, PollWaiterRegistry, RefreshWaiterRegistry};
