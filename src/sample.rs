//! Hand-off of measurement samples from workers to the aggregator.
//!
//! Workers own clones of a [`SampleSender`]; the aggregator owns the single
//! receiver. The channel closes by itself once the last worker drops its
//! sender, which is what tells the aggregator that the pool is done.

use std::time::Duration;
use tokio::sync::mpsc;

/// One unit of measurement produced by a worker.
///
/// # Examples
///
/// ```
/// use rspeed::Sample;
/// use std::time::Duration;
///
/// let bytes = Sample::Bytes(1_048_576);
/// let rtt = Sample::Duration(Duration::from_millis(12));
///
/// assert_eq!(bytes.bytes(), Some(1_048_576));
/// assert_eq!(rtt.bytes(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Payload bytes moved by one download or upload exchange
    Bytes(u64),
    /// Round trip of one ping exchange
    Duration(Duration),
}

impl Sample {
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Sample::Bytes(n) => Some(*n),
            Sample::Duration(_) => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Sample::Duration(d) => Some(*d),
            Sample::Bytes(_) => None,
        }
    }
}

/// Producer half of the sample channel, cloned into every worker.
#[derive(Debug, Clone)]
pub struct SampleSender {
    sender: mpsc::Sender<Sample>,
}

impl SampleSender {
    /// Sends a sample, waiting for room in the channel.
    ///
    /// Returns `false` when the aggregator has gone away, in which case the
    /// worker has nobody left to report to and should stop.
    pub async fn send(&self, sample: Sample) -> bool {
        self.sender.send(sample).await.is_ok()
    }
}

/// Creates a bounded sample channel.
///
/// A capacity of zero is raised to one since tokio channels need room for at
/// least a single message.
pub fn sample_channel(capacity: usize) -> (SampleSender, mpsc::Receiver<Sample>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (SampleSender { sender }, receiver)
}
