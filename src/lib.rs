//! Loki Shipper Library
//!
//! This library ships application logs to a Grafana Loki endpoint without
//! blocking the application on network I/O:
//!
//! - **record**: Record, batch and label types
//! - **encoder**: Batch to Loki push payload encoding
//! - **client**: HTTP push with gzip and basic auth
//! - **pusher**: Background batching with size and time-based flush triggers
//! - **config**: Pipeline configuration, loadable from the environment
//! - **layer**: `tracing` layer feeding events into a pusher
//!
//! # Example
//!
//! ```no_run
//! use loki_shipper::config::Config;
//! use loki_shipper::layer::LokiLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let mut config = Config::from_env().expect("Failed to load config");
//! config.labels.insert("app".to_string(), "billing".to_string());
//!
//! let layer = LokiLayer::new(config).expect("Failed to start Loki layer");
//! let pusher = layer.pusher();
//! tracing_subscriber::registry().with(layer).init();
//!
//! tracing::info!(invoice = 42, "invoice created");
//!
//! // Flush whatever is still buffered before exiting
//! pusher.shutdown();
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod encoder;
pub mod layer;
pub mod pusher;
pub mod record;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, LokiClient};
pub use config::{Config, ConfigError};
pub use encoder::{encode, PushRequest};
pub use layer::LokiLayer;
pub use pusher::{Pusher, PusherError, PusherSettings, PusherStats};
pub use record::{Batch, Labels, Record};
