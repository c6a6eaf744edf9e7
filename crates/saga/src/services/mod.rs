//! Collaborators used by saga steps: domain stores, remote peers, and
//! observability sinks, each with an in-memory implementation.

pub mod monitor;
pub mod payment;
pub mod peer;
pub mod project;
pub mod store;

pub use monitor::{
    InMemoryMonitor, MetricsMonitor, Monitor, MonitorEvent, MonitorSet, MonitorSummary,
};
pub use payment::InMemoryPaymentPeer;
pub use peer::{HttpPeer, RemotePeer, RemoteRequest, RemoteResponse};
pub use project::LocalProjectPeer;
pub use store::{InMemoryRecordStore, Record, RecordStore};
