use crate::probe::ServerDescriptor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a worker does when a request fails at the transport level or
/// returns a non-success status.
///
/// Bandwidth workers saturate the path by retrying immediately, with no
/// backoff. `StopWorker` exists so tests can observe a single failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Drop the failed exchange and start the next one right away
    #[default]
    IgnoreAndContinue,
    /// End the worker on its first failed exchange
    StopWorker,
}

/// Configuration for a speed test run.
///
/// A `Config` is read-only for the duration of a session; the engine shares it
/// between workers behind an `Arc`. Use the builder methods to customize it.
///
/// # Examples
///
/// ```
/// use rspeed::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_download_streams(4)
///     .with_download_time(Duration::from_secs(10))
///     .with_overhead_compensation_factor(1.0);
///
/// assert_eq!(config.download_streams, 4);
/// assert_eq!(config.effective_download_streams(), 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Order of tests: `I` ip lookup, `D` download, `U` upload, `P` ping, `_` pause
    pub test_order: String,

    /// Deadline of the download test
    pub download_time: Duration,

    /// Deadline of the upload test
    pub upload_time: Duration,

    /// Number of ping attempts in the latency test
    pub count_ping: u32,

    /// Download endpoint (`garbage.php`)
    pub url_download: String,

    /// Upload endpoint (`empty.php`)
    pub url_upload: String,

    /// Latency endpoint (`empty.php`)
    pub url_ping: String,

    /// Client IP lookup endpoint (`getIP.php`)
    pub url_get_ip: String,

    /// Ask the IP endpoint for ISP details
    pub get_ip_isp_info: bool,

    /// Concurrent download streams; values below 1 mean a single stream
    pub download_streams: i32,

    /// Concurrent upload streams; values below 1 mean a single stream
    pub upload_streams: i32,

    /// Delay between starting two streams of the same pool
    pub stream_delay: Duration,

    /// `ckSize` query parameter sent to the download endpoint
    pub garbage_chunk_size: u32,

    /// Size of the random payload posted by upload workers
    pub upload_payload_size: usize,

    /// Divisor applied to raw throughput to account for protocol overhead
    pub overhead_compensation_factor: f64,

    /// Re-express speeds with the `1_000_000 / 1_048_576` scale
    pub use_mebibits: bool,

    /// Per-request timeout for download and upload exchanges
    pub transfer_timeout: Duration,

    /// Per-request timeout for ping exchanges and server probes
    pub ping_timeout: Duration,

    /// Failure handling inside worker loops
    pub error_policy: ErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_server_base("https://speedtest.atlanta.linode.com/")
    }
}

impl Config {
    /// Creates a configuration with default values pointed at the Atlanta mirror.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_server_base(base: &str) -> Self {
        Self {
            test_order: "IP_D_U".to_string(),
            download_time: Duration::from_secs(15),
            upload_time: Duration::from_secs(15),
            count_ping: 10,
            url_download: format!("{}garbage.php", base),
            url_upload: format!("{}empty.php", base),
            url_ping: format!("{}empty.php", base),
            url_get_ip: format!("{}getIP.php", base),
            get_ip_isp_info: true,
            download_streams: 6,
            upload_streams: 3,
            stream_delay: Duration::from_millis(300),
            garbage_chunk_size: 100,
            upload_payload_size: 1024 * 1024, // 1 MiB
            overhead_compensation_factor: 1.06,
            use_mebibits: false,
            transfer_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            error_policy: ErrorPolicy::IgnoreAndContinue,
        }
    }

    /// Points every endpoint at the given server.
    ///
    /// The descriptor URL is a base ending in `/`; endpoint names are
    /// appended to it verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::{Config, ServerDescriptor};
    ///
    /// let server = ServerDescriptor::new("Tokyo", "https://speedtest.tokyo2.linode.com/");
    /// let config = Config::new().with_server(&server);
    ///
    /// assert_eq!(config.url_download, "https://speedtest.tokyo2.linode.com/garbage.php");
    /// assert_eq!(config.url_get_ip, "https://speedtest.tokyo2.linode.com/getIP.php");
    /// ```
    pub fn with_server(mut self, server: &ServerDescriptor) -> Self {
        self.url_download = format!("{}garbage.php", server.url);
        self.url_upload = format!("{}empty.php", server.url);
        self.url_ping = format!("{}empty.php", server.url);
        self.url_get_ip = format!("{}getIP.php", server.url);
        self
    }

    /// Sets the order in which tests run.
    ///
    /// `I` looks up the client IP, `D` downloads, `U` uploads and `P` pings.
    /// Each test runs at most once; every character, `_` included, is
    /// followed by a short pause.
    ///
    /// # Arguments
    ///
    /// * `order` - Test order string (default: `"IP_D_U"`)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_test_order("PD");
    /// assert_eq!(config.test_order, "PD");
    /// ```
    pub fn with_test_order(mut self, order: impl Into<String>) -> Self {
        self.test_order = order.into();
        self
    }

    /// Sets how long the download test runs.
    ///
    /// # Arguments
    ///
    /// * `time` - Download time budget (default: 15 seconds)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::new().with_download_time(Duration::from_secs(10));
    /// ```
    pub fn with_download_time(mut self, time: Duration) -> Self {
        self.download_time = time;
        self
    }

    /// Sets how long the upload test runs.
    ///
    /// # Arguments
    ///
    /// * `time` - Upload time budget (default: 15 seconds)
    pub fn with_upload_time(mut self, time: Duration) -> Self {
        self.upload_time = time;
        self
    }

    /// Sets the number of round trips of the latency test.
    ///
    /// Failed round trips count against this number without producing a
    /// sample.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of pings (default: 10)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_count_ping(20);
    /// assert_eq!(config.count_ping, 20);
    /// ```
    pub fn with_count_ping(mut self, count: u32) -> Self {
        self.count_ping = count;
        self
    }

    /// Sets the number of parallel download streams.
    ///
    /// Zero or negative values run a single stream.
    ///
    /// # Arguments
    ///
    /// * `streams` - Number of download workers (default: 6)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_download_streams(0);
    /// assert_eq!(config.effective_download_streams(), 1);
    /// ```
    pub fn with_download_streams(mut self, streams: i32) -> Self {
        self.download_streams = streams;
        self
    }

    /// Sets the number of parallel upload streams.
    ///
    /// Zero or negative values run a single stream.
    ///
    /// # Arguments
    ///
    /// * `streams` - Number of upload workers (default: 3)
    pub fn with_upload_streams(mut self, streams: i32) -> Self {
        self.upload_streams = streams;
        self
    }

    /// Sets both download and upload stream counts.
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_streams(4);
    /// assert_eq!(config.effective_download_streams(), 4);
    /// assert_eq!(config.effective_upload_streams(), 4);
    /// ```
    pub fn with_streams(self, streams: i32) -> Self {
        self.with_download_streams(streams)
            .with_upload_streams(streams)
    }

    /// Sets the delay between starting two consecutive streams.
    ///
    /// A single stream starts without delay.
    ///
    /// # Arguments
    ///
    /// * `delay` - Start-up delay per additional stream (default: 300 ms)
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    /// Sets the `ckSize` requested from `garbage.php`.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of 1 MiB chunks per download request (default: 100)
    pub fn with_garbage_chunk_size(mut self, size: u32) -> Self {
        self.garbage_chunk_size = size;
        self
    }

    /// Sets the size of the random upload body.
    ///
    /// # Arguments
    ///
    /// * `size` - Payload size in bytes (default: 1 MiB)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_upload_payload_size(256 * 1024); // 256 KiB
    /// ```
    pub fn with_upload_payload_size(mut self, size: usize) -> Self {
        self.upload_payload_size = size;
        self
    }

    /// Sets the divisor applied to raw throughput for protocol overhead.
    ///
    /// # Arguments
    ///
    /// * `factor` - Positive compensation factor (default: 1.06)
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::Config;
    ///
    /// let config = Config::new().with_overhead_compensation_factor(1.0);
    /// assert!(config.validate().is_ok());
    ///
    /// let config = Config::new().with_overhead_compensation_factor(0.0);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn with_overhead_compensation_factor(mut self, factor: f64) -> Self {
        self.overhead_compensation_factor = factor;
        self
    }

    /// Reports speeds in mebibits per second instead of megabits.
    ///
    /// # Arguments
    ///
    /// * `use_mebibits` - `true` to scale results by 1,000,000 / 1,048,576
    pub fn with_mebibits(mut self, use_mebibits: bool) -> Self {
        self.use_mebibits = use_mebibits;
        self
    }

    /// Sets the per-request timeout of download, upload and IP requests.
    ///
    /// The same value is the grace period after a bandwidth test's deadline
    /// before remaining workers are aborted.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Request timeout (default: 10 seconds)
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Sets the timeout of a single ping.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Ping timeout (default: 5 seconds)
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets what workers do after a failed request.
    ///
    /// # Examples
    ///
    /// ```
    /// use rspeed::{Config, ErrorPolicy};
    ///
    /// let config = Config::new().with_error_policy(ErrorPolicy::StopWorker);
    /// assert_eq!(config.error_policy, ErrorPolicy::StopWorker);
    /// ```
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Asks the IP endpoint for ISP details (`isp=true`).
    pub fn with_isp_info(mut self, isp_info: bool) -> Self {
        self.get_ip_isp_info = isp_info;
        self
    }

    /// Number of download workers actually spawned.
    pub fn effective_download_streams(&self) -> usize {
        clamp_streams(self.download_streams)
    }

    /// Number of upload workers actually spawned.
    pub fn effective_upload_streams(&self) -> usize {
        clamp_streams(self.upload_streams)
    }

    /// Checks the values the engine cannot recover from.
    ///
    /// Stream counts are never rejected, they are clamped instead.
    pub fn validate(&self) -> Result<()> {
        if !self.overhead_compensation_factor.is_finite() || self.overhead_compensation_factor <= 0.0
        {
            return Err(Error::Config(format!(
                "overhead compensation factor must be positive, got {}",
                self.overhead_compensation_factor
            )));
        }

        if self.upload_payload_size == 0 {
            return Err(Error::Config(
                "upload payload size must be at least one byte".to_string(),
            ));
        }

        for url in [
            &self.url_download,
            &self.url_upload,
            &self.url_ping,
            &self.url_get_ip,
        ] {
            reqwest::Url::parse(url).map_err(|e| Error::Url(format!("{}: {}", url, e)))?;
        }

        Ok(())
    }
}

/// Streams configured as zero or negative run as a single stream.
pub fn clamp_streams(configured: i32) -> usize {
    configured.max(1) as usize
}
