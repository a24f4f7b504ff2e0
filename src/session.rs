//! Stream pools and time-boxed sessions.
//!
//! A [`StreamPool`] spawns the workers of one test and waits for them; a
//! [`Session`] puts a deadline and a stop signal around the pool and drains
//! the sample channel into an [`Aggregate`] until the channel closes.

use crate::measurements::Aggregate;
use crate::sample::{sample_channel, Sample, SampleSender};
use crate::worker::{Endpoint, TestKind, Worker, WorkerContext};
use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// `N` workers of one variant against one endpoint.
#[derive(Debug, Clone)]
pub struct StreamPool {
    worker: Worker,
    streams: usize,
    stagger: Duration,
}

impl StreamPool {
    /// Creates a pool; a stream count of zero runs one worker.
    pub fn new(worker: Worker, streams: usize) -> Self {
        Self {
            worker,
            streams: streams.max(1),
            stagger: Duration::ZERO,
        }
    }

    /// Delay between starting two consecutive workers. Ignored for a single
    /// stream.
    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn streams(&self) -> usize {
        self.streams
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Room in the sample channel: two samples per stream for bandwidth
    /// tests, the whole count for ping.
    pub fn channel_capacity(&self) -> usize {
        match self.worker {
            Worker::Ping { count } => count as usize,
            _ => self.streams * 2,
        }
    }

    /// Spawns every worker, then waits for all of them to return.
    ///
    /// Each worker holds a clone of the sample sender. The pool's own clone is
    /// released once spawning ends, so the channel closes exactly when the last
    /// worker exits. Dropping the returned future aborts all workers.
    pub async fn run(self, endpoint: Endpoint, token: CancellationToken, samples: SampleSender) {
        let mut workers = JoinSet::new();
        let ctx = WorkerContext::new(endpoint, token.clone(), samples);

        for i in 0..self.streams {
            if token.is_cancelled() {
                debug!("stopped ramp-up after {} of {} streams", i, self.streams);
                break;
            }

            workers.spawn(self.worker.clone().run(ctx.clone()));

            if self.streams > 1 && i + 1 < self.streams {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.stagger) => {}
                }
            }
        }
        drop(ctx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!("{} worker panicked: {}", self.worker.kind(), e);
                }
            }
        }
    }
}

/// What a session hands back once its channel has closed.
#[derive(Debug, Clone)]
pub struct SessionOutcome<A> {
    pub aggregate: A,
    /// Wall-clock time from pool start to channel close
    pub elapsed: Duration,
    /// Workers outlived the deadline plus grace period and were aborted
    pub aborted: bool,
}

/// A deadline and stop signal wrapped around one stream pool.
#[derive(Debug)]
pub struct Session {
    token: CancellationToken,
    budget: Option<Duration>,
    grace: Duration,
}

impl Session {
    /// A session stopped after `budget`.
    ///
    /// If workers are still alive `grace` after the deadline, the pool is
    /// aborted so aggregation always ends.
    pub fn timed(parent: &CancellationToken, budget: Duration, grace: Duration) -> Self {
        Self {
            token: parent.child_token(),
            budget: Some(budget),
            grace,
        }
    }

    /// A session with no deadline; it ends when every worker has returned.
    pub fn unbounded(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            budget: None,
            grace: Duration::ZERO,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs the pool and folds every sample into `aggregate`.
    ///
    /// Dropping the returned future cancels the session token, so workers
    /// stop with it.
    pub async fn run<A: Aggregate>(
        self,
        pool: StreamPool,
        endpoint: Endpoint,
        aggregate: A,
    ) -> SessionOutcome<A> {
        let kind = pool.worker().kind();
        info!(
            "starting {} session: {} stream(s), budget {:?}",
            kind,
            pool.streams(),
            self.budget
        );

        let (sender, receiver) = sample_channel(pool.channel_capacity());
        let token = self.token.clone();
        self.drive(kind, pool.run(endpoint, token, sender), receiver, aggregate)
            .await
    }

    /// Spawns `producers`, arms the deadline and drains `receiver` until it
    /// closes or the hard limit passes.
    async fn drive<A, F>(
        self,
        kind: TestKind,
        producers: F,
        mut receiver: mpsc::Receiver<Sample>,
        mut aggregate: A,
    ) -> SessionOutcome<A>
    where
        A: Aggregate,
        F: Future<Output = ()> + Send + 'static,
    {
        let _cancel_on_drop = self.token.clone().drop_guard();
        let started = Instant::now();
        let deadline = self.budget.map(|budget| started + budget);

        if let Some(deadline) = deadline {
            let token = self.token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!("{} deadline reached", kind);
                        token.cancel();
                    }
                }
            });
        }

        let pool_task = tokio::spawn(producers);

        let hard_limit = deadline.map(|deadline| deadline + self.grace);
        let mut aborted = false;

        loop {
            let next = match hard_limit {
                Some(limit) => match tokio::time::timeout_at(limit, receiver.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("{} workers still running past the deadline, aborting", kind);
                        pool_task.abort();
                        aborted = true;
                        break;
                    }
                },
                None => receiver.recv().await,
            };

            match next {
                Some(sample) => aggregate.record(sample),
                None => break,
            }
        }

        // Samples already queued when the pool was aborted were produced in time.
        while let Ok(sample) = receiver.try_recv() {
            aggregate.record(sample);
        }

        let elapsed = started.elapsed();
        self.token.cancel();

        info!("{} session finished after {:?}", kind, elapsed);

        SessionOutcome {
            aggregate,
            elapsed,
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::{LatencyAggregate, ThroughputAggregate};
    use bytes::Bytes;

    #[test]
    fn test_pool_clamps_streams() {
        let pool = StreamPool::new(Worker::Download { chunk_size: 1 }, 0);
        assert_eq!(pool.streams(), 1);
        assert_eq!(pool.channel_capacity(), 2);
    }

    #[test]
    fn test_channel_capacity() {
        let upload = StreamPool::new(
            Worker::Upload {
                payload: Bytes::from_static(b"x"),
            },
            3,
        );
        assert_eq!(upload.channel_capacity(), 6);

        let ping = StreamPool::new(Worker::Ping { count: 10 }, 1);
        assert_eq!(ping.channel_capacity(), 10);
    }

    #[test]
    fn test_session_token_is_child_of_parent() {
        let parent = CancellationToken::new();
        let session = Session::timed(&parent, Duration::from_secs(1), Duration::ZERO);
        parent.cancel();
        assert!(session.token().is_cancelled());

        let parent = CancellationToken::new();
        let session = Session::unbounded(&parent);
        session.token().cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_parent_ends_session_immediately() {
        let parent = CancellationToken::new();
        parent.cancel();

        let endpoint = Endpoint::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/garbage.php",
            Duration::from_secs(10),
        );
        let session = Session::timed(&parent, Duration::from_secs(30), Duration::from_secs(10));
        let pool = StreamPool::new(Worker::Download { chunk_size: 1 }, 4)
            .with_stagger(Duration::from_secs(5));

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            session.run(pool, endpoint, ThroughputAggregate::default()),
        )
        .await
        .expect("a cancelled session must not wait for its budget");

        assert_eq!(outcome.aggregate.samples, 0);
        assert!(!outcome.aborted);
    }

    #[tokio::test]
    async fn test_zero_budget_collects_nothing() {
        let endpoint = Endpoint::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/empty.php",
            Duration::from_secs(10),
        );
        let session = Session::timed(&CancellationToken::new(), Duration::ZERO, Duration::from_secs(1));
        let pool = StreamPool::new(Worker::Ping { count: 3 }, 1);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            session.run(pool, endpoint, LatencyAggregate::new()),
        )
        .await
        .expect("session must end");

        assert!(outcome.aggregate.is_empty());
    }

    #[tokio::test]
    async fn test_producers_ignoring_cancellation_are_aborted() {
        let (sender, receiver) = sample_channel(4);
        let stubborn = async move {
            let _ = sender.send(Sample::Bytes(1_000)).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(sender);
        };
        let session = Session::timed(
            &CancellationToken::new(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            session.drive(TestKind::Download, stubborn, receiver, ThroughputAggregate::default()),
        )
        .await
        .expect("hard limit must end the session");

        assert!(outcome.aborted);
        assert_eq!(outcome.aggregate.total_bytes, 1_000);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dropped_session_cancels_its_token() {
        let (_sender, receiver) = sample_channel(1);
        let session = Session::unbounded(&CancellationToken::new());
        let token = session.token().clone();

        let drained = tokio::time::timeout(
            Duration::from_millis(100),
            session.drive(
                TestKind::Latency,
                std::future::pending::<()>(),
                receiver,
                LatencyAggregate::new(),
            ),
        )
        .await;

        assert!(drained.is_err());
        assert!(token.is_cancelled());
    }
}
