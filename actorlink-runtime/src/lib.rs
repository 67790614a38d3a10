//! Pending-call tracking (C5), proxy lifecycle (C6), configuration (C9),
//! and the actor system kernel (C7) that ties them to a link.

pub mod config;
pub mod kernel;
pub mod metrics;
pub mod pending;
pub mod proxy;

pub use config::RuntimeConfig;
pub use kernel::{Handler, Kernel};
pub use metrics::{RuntimeMetrics, RuntimeMetricsSnapshot};
pub use pending::{CallOutcome, PendingCallTable};
pub use proxy::{Proxy, ProxyManager};
