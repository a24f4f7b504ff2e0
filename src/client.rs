use crate::config::Config;
use crate::measurements::{
    IpInfo, LatencyAggregate, LatencyResult, SpeedResult, SpeedTestResult, ThroughputAggregate,
};
use crate::session::{Session, StreamPool};
use crate::url::get_ip_url;
use crate::worker::{random_payload, Endpoint, TestKind, Worker};
use crate::{Error, Result, VERSION};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause between two steps of the test order.
pub const STEP_PAUSE: Duration = Duration::from_millis(300);

/// Progress event types reported during a run.
///
/// # Examples
///
/// ```no_run
/// use rspeed::{Client, Config, ProgressEvent};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new(Config::new())?.with_callback(|event: ProgressEvent| match event {
///     ProgressEvent::TestStarted(kind) => println!("testing {}...", kind),
///     ProgressEvent::SpeedMeasured { kind, result } => {
///         println!("{}: {:.2} Mbps", kind, result.mbps)
///     }
///     ProgressEvent::LatencyMeasured(result) => {
///         println!("ping {:.2} ms, jitter {:.2} ms", result.ping_ms, result.jitter_ms)
///     }
///     ProgressEvent::IpResolved(info) => println!("IP: {}", info.processed_string),
///     ProgressEvent::Error(msg) => eprintln!("error: {}", msg),
/// });
///
/// let result = client.run().await;
/// println!("{:?}", result);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A download, upload or latency test is starting
    TestStarted(TestKind),
    /// A download or upload test finished
    SpeedMeasured { kind: TestKind, result: SpeedResult },
    /// The latency test finished
    LatencyMeasured(LatencyResult),
    /// The client IP lookup finished
    IpResolved(IpInfo),
    /// A non-fatal failure, such as an unreachable IP endpoint
    Error(String),
}

/// Callback trait for receiving progress updates.
///
/// Implemented for any `Fn(ProgressEvent) + Send + Sync` closure.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

type CallbackRef = Arc<dyn ProgressCallback>;

/// Speed test client.
///
/// Holds one configuration, one HTTP connection pool and a root
/// cancellation token from which every session derives its own stop signal.
/// The measurement entry points never fail: network trouble shows up as zero
/// valued results.
///
/// # Examples
///
/// ```no_run
/// use rspeed::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::new()
///     .with_download_streams(4)
///     .with_download_time(Duration::from_secs(10));
///
/// let client = Client::new(config)?;
/// let download = client.run_download().await;
/// let latency = client.run_latency().await;
///
/// println!("{:.2} Mbps, {:.2} ms", download.mbps, latency.ping_ms);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Arc<Config>,
    http: reqwest::Client,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a client after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive overhead factor, an empty upload
    /// payload, an unparsable endpoint URL or an HTTP client that cannot be
    /// built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .user_agent(format!("rspeed/{}", VERSION))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http,
            callback: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    /// Token cancelling every running and future session of this client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rspeed::{Client, Config};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::new())?;
    /// let cancel_token = client.cancellation_token().clone();
    ///
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(Duration::from_secs(5)).await;
    ///     cancel_token.cancel();
    /// });
    ///
    /// let result = client.run_download().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn endpoint(&self, url: &str, timeout: Duration) -> Endpoint {
        Endpoint::new(self.http.clone(), url, timeout).with_policy(self.config.error_policy)
    }

    /// Runs the multi-stream download test.
    pub async fn run_download(&self) -> SpeedResult {
        let pool = StreamPool::new(
            Worker::Download {
                chunk_size: self.config.garbage_chunk_size,
            },
            self.config.effective_download_streams(),
        );
        self.run_bandwidth(
            pool,
            &self.config.url_download,
            self.config.download_time,
        )
        .await
    }

    /// Runs the multi-stream upload test.
    ///
    /// One random payload is generated for the whole pool and reused by
    /// every request.
    pub async fn run_upload(&self) -> SpeedResult {
        let pool = StreamPool::new(
            Worker::Upload {
                payload: random_payload(self.config.upload_payload_size),
            },
            self.config.effective_upload_streams(),
        );
        self.run_bandwidth(pool, &self.config.url_upload, self.config.upload_time)
            .await
    }

    async fn run_bandwidth(&self, pool: StreamPool, url: &str, budget: Duration) -> SpeedResult {
        let kind = pool.worker().kind();
        self.notify(ProgressEvent::TestStarted(kind));

        let pool = pool.with_stagger(self.config.stream_delay);
        let session = Session::timed(
            &self.cancellation_token,
            budget,
            self.config.transfer_timeout,
        );
        let endpoint = self.endpoint(url, self.config.transfer_timeout);

        let outcome = session
            .run(pool, endpoint, ThroughputAggregate::default())
            .await;
        let result = outcome.aggregate.speed(
            outcome.elapsed,
            self.config.overhead_compensation_factor,
            self.config.use_mebibits,
        );

        if result.samples == 0 {
            warn!("{} test collected no usable samples", kind);
        }
        info!(
            "{}: {:.2} Mbps ({} bytes in {} samples over {:?})",
            kind, result.mbps, result.total_bytes, result.samples, result.elapsed
        );

        self.notify(ProgressEvent::SpeedMeasured { kind, result });
        result
    }

    /// Runs the latency test: `count_ping` sequential round trips on one
    /// worker, without a deadline.
    pub async fn run_latency(&self) -> LatencyResult {
        self.notify(ProgressEvent::TestStarted(TestKind::Latency));

        let pool = StreamPool::new(
            Worker::Ping {
                count: self.config.count_ping,
            },
            1,
        );
        let session = Session::unbounded(&self.cancellation_token);
        let endpoint = self.endpoint(&self.config.url_ping, self.config.ping_timeout);

        let outcome = session.run(pool, endpoint, LatencyAggregate::new()).await;
        let result = outcome.aggregate.result();

        if result.samples == 0 {
            warn!("latency test failed: no ping succeeded");
        }
        info!(
            "latency: {:.2} ms, jitter {:.2} ms over {} samples",
            result.ping_ms, result.jitter_ms, result.samples
        );

        self.notify(ProgressEvent::LatencyMeasured(result));
        result
    }

    /// Asks the server which address it sees for this client.
    pub async fn get_ip_info(&self) -> Result<IpInfo> {
        let url = get_ip_url(&self.config.url_get_ip, self.config.get_ip_isp_info);
        let body = self
            .http
            .get(&url)
            .timeout(self.config.transfer_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let info = IpInfo::from_body(&body);
        if info.processed_string.is_empty() {
            return Err(Error::Test("IP endpoint returned an empty body".to_string()));
        }
        Ok(info)
    }

    /// Runs the tests listed in the configured order.
    ///
    /// `I` looks up the client IP, `D` downloads, `U` uploads, `P` pings.
    /// Each test runs at most once; any other character only adds to the
    /// pause between steps. Cancelling the client token ends the run early
    /// with whatever was measured so far.
    pub async fn run(&self) -> SpeedTestResult {
        let mut result = SpeedTestResult::default();
        let mut done = Vec::with_capacity(4);

        for step in self.config.test_order.chars() {
            if self.cancellation_token.is_cancelled() {
                info!("run cancelled");
                break;
            }
            if done.contains(&step) {
                continue;
            }

            match step {
                'I' => match self.get_ip_info().await {
                    Ok(info) => {
                        result.client_ip = info.processed_string.clone();
                        result.isp_info = info.isp_description();
                        self.notify(ProgressEvent::IpResolved(info));
                    }
                    Err(e) => {
                        warn!("IP lookup failed: {}", e);
                        result.client_ip = "Unknown".to_string();
                        self.notify(ProgressEvent::Error(format!("IP lookup failed: {}", e)));
                    }
                },
                'D' => result.download_mbps = self.run_download().await.mbps,
                'U' => result.upload_mbps = self.run_upload().await.mbps,
                'P' => {
                    let latency = self.run_latency().await;
                    result.ping_ms = latency.ping_ms;
                    result.jitter_ms = latency.jitter_ms;
                }
                _ => {}
            }
            if matches!(step, 'I' | 'D' | 'U' | 'P') {
                done.push(step);
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {}
                _ = tokio::time::sleep(STEP_PAUSE) => {}
            }
        }

        result.timestamp = chrono::Utc::now();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config::new().with_overhead_compensation_factor(0.0);
        assert!(matches!(Client::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_callback_receives_events() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = Client::new(Config::new())
            .unwrap()
            .with_callback(move |event: ProgressEvent| sink.lock().unwrap().push(event));

        client.notify(ProgressEvent::TestStarted(TestKind::Upload));

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::TestStarted(TestKind::Upload)));
    }

    #[tokio::test]
    async fn test_cancelled_client_skips_run() {
        let client = Client::new(Config::new()).unwrap();
        client.cancellation_token().cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), client.run())
            .await
            .expect("cancelled run must return at once");

        assert_eq!(result.download_mbps, 0.0);
        assert_eq!(result.client_ip, "");
    }
}
