use crate::sample::Sample;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bits in a mebibit; raw throughput is expressed against this unit.
const BITS_PER_MEBIBIT: f64 = 1_048_576.0;

/// Scale applied to speeds when `use_mebibits` is set.
pub const MEBIBIT_SCALE: f64 = 1_000_000.0 / 1_048_576.0;

/// Consumer side of a session: folds samples into running totals.
///
/// The aggregator is owned by the single task draining the sample channel,
/// so implementations need no synchronization.
pub trait Aggregate: Send {
    fn record(&mut self, sample: Sample);
}

/// Running totals of a download or upload session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThroughputAggregate {
    pub total_bytes: u64,
    pub samples: u64,
}

impl Aggregate for ThroughputAggregate {
    fn record(&mut self, sample: Sample) {
        match sample {
            Sample::Bytes(n) => {
                self.total_bytes += n;
                self.samples += 1;
            }
            Sample::Duration(d) => debug!("ignoring latency sample {:?} in throughput test", d),
        }
    }
}

impl ThroughputAggregate {
    /// Derives the final speed for a session that ran for `elapsed`.
    pub fn speed(&self, elapsed: Duration, overhead_factor: f64, use_mebibits: bool) -> SpeedResult {
        SpeedResult {
            mbps: speed_mbps(self.total_bytes, elapsed, overhead_factor, use_mebibits),
            total_bytes: self.total_bytes,
            samples: self.samples,
            elapsed,
        }
    }
}

/// Computes throughput in Mbps.
///
/// `bytes * 8 / seconds / 1_048_576`, divided by the overhead compensation
/// factor and, with `use_mebibits`, scaled by [`MEBIBIT_SCALE`]. Degenerate
/// inputs (no bytes, no elapsed time, a result that is not finite) give 0.
///
/// # Examples
///
/// ```
/// use rspeed::measurements::speed_mbps;
/// use std::time::Duration;
///
/// // Three streams moving 1 MiB each over one second
/// let mbps = speed_mbps(3 * 1_048_576, Duration::from_secs(1), 1.0, false);
/// assert_eq!(mbps, 24.0);
///
/// assert_eq!(speed_mbps(0, Duration::from_secs(1), 1.0, false), 0.0);
/// assert_eq!(speed_mbps(1000, Duration::ZERO, 1.0, false), 0.0);
/// ```
pub fn speed_mbps(total_bytes: u64, elapsed: Duration, overhead_factor: f64, use_mebibits: bool) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if total_bytes == 0 || seconds <= 0.0 {
        return 0.0;
    }

    let mut speed = total_bytes as f64 * 8.0 / seconds / BITS_PER_MEBIBIT;
    speed /= overhead_factor;
    if use_mebibits {
        speed *= MEBIBIT_SCALE;
    }

    if speed.is_finite() && speed >= 0.0 {
        speed
    } else {
        0.0
    }
}

/// Round trips of a latency session, in milliseconds and arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyAggregate {
    latencies_ms: Vec<f64>,
}

impl Aggregate for LatencyAggregate {
    fn record(&mut self, sample: Sample) {
        match sample {
            Sample::Duration(d) => self.latencies_ms.push(d.as_secs_f64() * 1000.0),
            Sample::Bytes(n) => debug!("ignoring {} byte sample in latency test", n),
        }
    }
}

impl LatencyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_millis(latencies_ms: Vec<f64>) -> Self {
        Self { latencies_ms }
    }

    pub fn latencies_ms(&self) -> &[f64] {
        &self.latencies_ms
    }

    pub fn len(&self) -> usize {
        self.latencies_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latencies_ms.is_empty()
    }

    /// Arithmetic mean, 0 without samples.
    pub fn average_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    /// Mean absolute difference between consecutive samples, 0 below two
    /// samples.
    pub fn jitter_ms(&self) -> f64 {
        if self.latencies_ms.len() < 2 {
            return 0.0;
        }
        let total: f64 = self
            .latencies_ms
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .sum();
        total / (self.latencies_ms.len() - 1) as f64
    }

    pub fn result(&self) -> LatencyResult {
        LatencyResult {
            ping_ms: self.average_ms(),
            jitter_ms: self.jitter_ms(),
            samples: self.latencies_ms.len(),
        }
    }
}

/// Outcome of a download or upload test.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedResult {
    pub mbps: f64,
    pub total_bytes: u64,
    pub samples: u64,
    pub elapsed: Duration,
}

/// Outcome of a latency test. A test without samples reports `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyResult {
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub samples: usize,
}

/// Client address as reported by the server's IP endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpInfo {
    #[serde(default)]
    pub processed_string: String,
    #[serde(default)]
    pub raw_isp_info: serde_json::Value,
}

impl IpInfo {
    /// Parses a `getIP.php` response body.
    ///
    /// Servers without ISP lookup answer with plain text, which is kept as
    /// the processed string.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            processed_string: body.trim().to_string(),
            raw_isp_info: serde_json::Value::Null,
        })
    }

    /// ISP details flattened into a string for reports.
    pub fn isp_description(&self) -> String {
        match &self.raw_isp_info {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Consolidated result of a full run.
///
/// Serializes with the `download`, `upload`, `ping`, `jitter` and `ip` keys
/// used by other LibreSpeed command-line clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    #[serde(rename = "download")]
    pub download_mbps: f64,
    #[serde(rename = "upload")]
    pub upload_mbps: f64,
    #[serde(rename = "ping")]
    pub ping_ms: f64,
    #[serde(rename = "jitter")]
    pub jitter_ms: f64,
    #[serde(rename = "ip")]
    pub client_ip: String,
    pub isp_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Default for SpeedTestResult {
    fn default() -> Self {
        Self {
            download_mbps: 0.0,
            upload_mbps: 0.0,
            ping_ms: 0.0,
            jitter_ms: 0.0,
            client_ip: String::new(),
            isp_info: String::new(),
            server: None,
            timestamp: chrono::Utc::now(),
        }
    }
}
