// src/lib.rs
pub mod cache;
pub mod cli;
pub mod collections;
pub mod command;
pub mod config;
pub mod health;
pub mod message;
pub mod model;
pub mod native;
pub mod queue;
pub mod repository;
pub mod routing;
pub mod service;

pub use bytes::Bytes;

// Re-export tracing for use in other modules
pub use tracing;

pub use cache::{CacheUpdateHandler, RoutingCache};
pub use command::Command;
pub use config::{load_config_from_path, RouterConfig};
pub use health::{HealthMonitor, HealthReport};
pub use message::PlatformMessage;
pub use native::build_router;
pub use service::{MessageRouter, RouterService, RouterStatus};
