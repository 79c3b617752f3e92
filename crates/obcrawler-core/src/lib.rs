pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod gossip;
pub mod hash;
pub mod ipns;
pub mod job;
pub mod models;
pub mod node;
pub mod observer;
pub mod signed_record;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod timestamp;
pub mod worker;

pub use config::EngineConfig;
pub use dispatch::Crawler;
pub use node::{Node, NodeError, NodePool};
pub use store::{SqlStore, Store, StoreError};
pub use subscription::{Subscription, SubscriptionId};
pub use timestamp::Timestamp;
