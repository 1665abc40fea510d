//! Node assembly: configuration, supervision, the public API surface, and
//! an in-process multi-node testkit.

pub mod api;
pub mod config;
pub mod node;
pub mod supervisor;
pub mod testkit;

pub use api::{ApiError, PublicApiService, TransactionStatusResponse};
pub use config::{ConfigError, FederationMemberConfig, NodeConfig};
pub use node::{Node, NodeError};
pub use supervisor::Supervisor;
