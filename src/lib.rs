//! rspeed - multi-stream HTTP speed testing
//!
//! This library measures download and upload throughput, latency and jitter
//! against LibreSpeed-compatible HTTP servers such as the Linode mirrors.
//!
//! # Features
//!
//! - Parallel download and upload streams with staggered start-up
//! - Time-boxed sessions with hard cancellation of in-flight requests
//! - Latency and jitter from sequential round trips
//! - Closest-server selection by concurrent probing
//! - Progress callbacks and JSON output
//! - Asynchronous I/O using tokio and reqwest
//!
//! # Examples
//!
//! ```no_run
//! use rspeed::{default_servers, probe_closest_server, Client, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let servers = default_servers();
//! let index = probe_closest_server(&servers).await;
//!
//! let client = Client::new(Config::new().with_server(&servers[index]))?;
//! let result = client.run().await;
//!
//! println!("down {:.2} Mbps, up {:.2} Mbps", result.download_mbps, result.upload_mbps);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod measurements;
pub mod probe;
pub mod report;
pub mod sample;
pub mod session;
pub mod url;
pub mod worker;

pub use client::{Client, ProgressCallback, ProgressEvent};
pub use config::{Config, ErrorPolicy};
pub use error::{Error, Result};
pub use measurements::{IpInfo, LatencyResult, SpeedResult, SpeedTestResult};
pub use probe::{default_servers, probe_closest_server, ServerDescriptor};
pub use sample::Sample;
pub use session::{Session, StreamPool};
pub use worker::{TestKind, Worker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
