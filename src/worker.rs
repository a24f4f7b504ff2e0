//! Download, upload and ping workers.
//!
//! A worker is a spawned task that performs one HTTP exchange after another
//! and reports each usable outcome as a [`Sample`]. Every in-flight exchange
//! is raced against the session's cancellation token, so a stopped session
//! abandons its requests instead of waiting on them.

use crate::config::ErrorPolicy;
use crate::sample::{Sample, SampleSender};
use crate::url::{download_url, ping_url, upload_url};
use bytes::Bytes;
use log::debug;
use rand::RngCore;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Exchanges finishing this fast are treated as cached or truncated and
/// produce no sample.
pub const MIN_SAMPLE_DURATION: Duration = Duration::from_millis(100);

/// Pause after every successful ping.
pub const PING_INTERVAL: Duration = Duration::from_millis(200);

/// The measurement a worker contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestKind {
    Download,
    Upload,
    Latency,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKind::Download => write!(f, "download"),
            TestKind::Upload => write!(f, "upload"),
            TestKind::Latency => write!(f, "latency"),
        }
    }
}

/// Where and how a worker sends its requests.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub http: reqwest::Client,
    pub url: String,
    pub timeout: Duration,
    pub policy: ErrorPolicy,
}

impl Endpoint {
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
            policy: ErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Everything a running worker owns: its endpoint, the session's stop
/// signal and its handle on the sample channel.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    endpoint: Endpoint,
    token: CancellationToken,
    samples: SampleSender,
}

enum Flow {
    Continue,
    Stop,
}

impl WorkerContext {
    pub fn new(endpoint: Endpoint, token: CancellationToken, samples: SampleSender) -> Self {
        Self {
            endpoint,
            token,
            samples,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Applies the 100 ms validity gate to a finished transfer.
    async fn record_transfer(&self, bytes: u64, elapsed: Duration) -> Flow {
        if elapsed <= MIN_SAMPLE_DURATION {
            debug!(
                "discarding {} byte transfer finished in {:?}",
                bytes, elapsed
            );
            return Flow::Continue;
        }
        self.emit(Sample::Bytes(bytes)).await
    }

    async fn emit(&self, sample: Sample) -> Flow {
        if self.samples.send(sample).await {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    async fn on_failure(&self, kind: TestKind, err: reqwest::Error) -> Flow {
        debug!("{} request to {} failed: {}", kind, self.endpoint.url, err);
        match self.endpoint.policy {
            ErrorPolicy::IgnoreAndContinue => {
                // A refused connection can fail without ever suspending.
                tokio::task::yield_now().await;
                Flow::Continue
            }
            ErrorPolicy::StopWorker => Flow::Stop,
        }
    }
}

/// One of the three worker variants together with its parameters.
#[derive(Debug, Clone)]
pub enum Worker {
    /// Repeated `GET`s of `ckSize` chunks of garbage data
    Download { chunk_size: u32 },
    /// Repeated `POST`s of a payload shared by every worker of the pool
    Upload { payload: Bytes },
    /// A fixed number of sequential round trips
    Ping { count: u32 },
}

impl Worker {
    pub fn kind(&self) -> TestKind {
        match self {
            Worker::Download { .. } => TestKind::Download,
            Worker::Upload { .. } => TestKind::Upload,
            Worker::Ping { .. } => TestKind::Latency,
        }
    }

    /// Runs the worker until it is stopped or, for ping, until its count is
    /// exhausted.
    pub async fn run(self, ctx: WorkerContext) {
        match self {
            Worker::Download { chunk_size } => run_download(ctx, chunk_size).await,
            Worker::Upload { payload } => run_upload(ctx, payload).await,
            Worker::Ping { count } => run_ping(ctx, count).await,
        }
    }
}

/// Generates the random upload payload.
pub fn random_payload(size: usize) -> Bytes {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    Bytes::from(data)
}

async fn run_download(ctx: WorkerContext, chunk_size: u32) {
    while !ctx.token.is_cancelled() {
        let url = download_url(&ctx.endpoint.url, chunk_size);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            result = download_once(&ctx.endpoint, &url) => result,
        };

        let flow = match result {
            Ok(read) => ctx.record_transfer(read, start.elapsed()).await,
            Err(e) => ctx.on_failure(TestKind::Download, e).await,
        };
        if let Flow::Stop = flow {
            break;
        }
    }
}

async fn download_once(endpoint: &Endpoint, url: &str) -> reqwest::Result<u64> {
    let mut response = endpoint
        .http
        .get(url)
        .timeout(endpoint.timeout)
        .send()
        .await?
        .error_for_status()?;

    Ok(drain_body(&mut response).await)
}

async fn run_upload(ctx: WorkerContext, payload: Bytes) {
    let size = payload.len() as u64;

    while !ctx.token.is_cancelled() {
        let url = upload_url(&ctx.endpoint.url);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            result = upload_once(&ctx.endpoint, &url, payload.clone()) => result,
        };

        let flow = match result {
            Ok(()) => ctx.record_transfer(size, start.elapsed()).await,
            Err(e) => ctx.on_failure(TestKind::Upload, e).await,
        };
        if let Flow::Stop = flow {
            break;
        }
    }
}

async fn upload_once(endpoint: &Endpoint, url: &str, payload: Bytes) -> reqwest::Result<()> {
    let mut response = endpoint
        .http
        .post(url)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(payload)
        .timeout(endpoint.timeout)
        .send()
        .await?
        .error_for_status()?;

    drain_body(&mut response).await;
    Ok(())
}

async fn run_ping(ctx: WorkerContext, count: u32) {
    for attempt in 0..count {
        if ctx.token.is_cancelled() {
            break;
        }

        let url = ping_url(&ctx.endpoint.url);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            result = ping_once(&ctx.endpoint, &url) => result,
        };

        match result {
            Ok(()) => {
                let rtt = start.elapsed();
                debug!("ping {}/{}: {:?}", attempt + 1, count, rtt);
                if let Flow::Stop = ctx.emit(Sample::Duration(rtt)).await {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = ctx.token.cancelled() => break,
                    _ = tokio::time::sleep(PING_INTERVAL) => {}
                }
            }
            Err(e) => {
                if let Flow::Stop = ctx.on_failure(TestKind::Latency, e).await {
                    break;
                }
            }
        }
    }
}

async fn ping_once(endpoint: &Endpoint, url: &str) -> reqwest::Result<()> {
    let mut response = endpoint
        .http
        .get(url)
        .timeout(endpoint.timeout)
        .send()
        .await?
        .error_for_status()?;

    drain_body(&mut response).await;
    Ok(())
}

/// Reads and discards a response body, returning how many bytes arrived.
///
/// A body cut short by a timeout or reset still counts what was read.
async fn drain_body(response: &mut reqwest::Response) -> u64 {
    let mut read = 0u64;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => read += chunk.len() as u64,
            Ok(None) => break,
            Err(e) => {
                debug!("response body interrupted after {} bytes: {}", read, e);
                break;
            }
        }
    }
    read
}
