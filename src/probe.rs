//! Server selection by round-trip latency.
//!
//! Every candidate gets exactly one `GET {base}empty.php`, all of them at
//! once. The fastest answer wins; when nobody answers, the first server in
//! the list is used.

use crate::url::probe_url;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Timeout of a single server probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A speed test server: a display name and a base URL ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub url: String,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

const LINODE_SERVERS: &[(&str, &str)] = &[
    ("Atlanta", "https://speedtest.atlanta.linode.com/"),
    ("Chicago", "https://speedtest.chicago.linode.com/"),
    ("Dallas", "https://speedtest.dallas.linode.com/"),
    ("Fremont", "https://speedtest.fremont.linode.com/"),
    ("Los Angeles", "https://speedtest.los-angeles.linode.com/"),
    ("Miami", "https://speedtest.miami.linode.com/"),
    ("Newark", "https://speedtest.newark.linode.com/"),
    ("Seattle", "https://speedtest.seattle.linode.com/"),
    ("Washington, DC", "https://speedtest.washington.linode.com/"),
    ("Toronto", "https://speedtest.toronto1.linode.com/"),
    ("Sao Paulo", "https://speedtest.sao-paulo.linode.com/"),
    ("Amsterdam", "https://speedtest.amsterdam.linode.com/"),
    ("Frankfurt", "https://speedtest.frankfurt.linode.com/"),
    ("Frankfurt 2", "https://de-fra-2.speedtest.linode.com/"),
    ("London", "https://speedtest.london.linode.com/"),
    ("London 2", "https://gb-lon.speedtest.linode.com/"),
    ("Madrid", "https://speedtest.madrid.linode.com/"),
    ("Milan", "https://speedtest.milan.linode.com/"),
    ("Paris", "https://speedtest.paris.linode.com/"),
    ("Stockholm", "https://speedtest.stockholm.linode.com/"),
    ("Chennai", "https://speedtest.chennai.linode.com/"),
    ("Jakarta", "https://speedtest.jakarta.linode.com/"),
    ("Mumbai", "https://speedtest.mumbai1.linode.com/"),
    ("Mumbai 2", "https://in-mum-2.speedtest.linode.com/"),
    ("Osaka", "https://speedtest.osaka.linode.com/"),
    ("Singapore", "https://speedtest.singapore.linode.com/"),
    ("Singapore 2", "https://sg-sin-2.speedtest.linode.com/"),
    ("Tokyo", "https://speedtest.tokyo2.linode.com/"),
    ("Tokyo 3", "https://jp-tyo-3.speedtest.linode.com/"),
    ("Sydney", "https://speedtest.sydney.linode.com/"),
    ("Melbourne", "https://au-mel.speedtest.linode.com/"),
];

/// The Linode speed test mirrors.
pub fn default_servers() -> Vec<ServerDescriptor> {
    LINODE_SERVERS
        .iter()
        .map(|(name, url)| ServerDescriptor::new(*name, *url))
        .collect()
}

/// Measures one round trip to `server`, `None` if it failed.
pub async fn probe_latency(
    http: &reqwest::Client,
    server: &ServerDescriptor,
    timeout: Duration,
) -> Option<Duration> {
    let url = probe_url(&server.url);
    let start = Instant::now();

    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match response {
        Ok(_) => {
            let latency = start.elapsed();
            debug!("probe {} answered in {:?}", server.name, latency);
            Some(latency)
        }
        Err(e) => {
            debug!("probe {} failed: {}", server.name, e);
            None
        }
    }
}

/// Probes every server concurrently; results are indexed like `servers`.
pub async fn probe_all(
    http: &reqwest::Client,
    servers: &[ServerDescriptor],
    timeout: Duration,
) -> Vec<Option<Duration>> {
    let mut probes = JoinSet::new();
    for (index, server) in servers.iter().enumerate() {
        let http = http.clone();
        let server = server.clone();
        probes.spawn(async move { (index, probe_latency(&http, &server, timeout).await) });
    }

    let mut latencies = vec![None; servers.len()];
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((index, latency)) => latencies[index] = latency,
            Err(e) => warn!("server probe task failed: {}", e),
        }
    }
    latencies
}

/// Index of the lowest latency, or 0 when every probe failed.
///
/// Ties go to the earlier server.
pub fn closest_index(latencies: &[Option<Duration>]) -> usize {
    latencies
        .iter()
        .enumerate()
        .filter_map(|(index, latency)| latency.map(|l| (index, l)))
        .min_by_key(|(index, latency)| (*latency, *index))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Picks the server with the lowest probe latency.
///
/// Falls back to index 0 when no server answers; the returned server may
/// then be untested.
pub async fn probe_closest_server(servers: &[ServerDescriptor]) -> usize {
    probe_closest_server_with(&reqwest::Client::new(), servers, PROBE_TIMEOUT).await
}

/// Same as [`probe_closest_server`] with a caller-provided client and timeout.
pub async fn probe_closest_server_with(
    http: &reqwest::Client,
    servers: &[ServerDescriptor],
    timeout: Duration,
) -> usize {
    let latencies = probe_all(http, servers, timeout).await;

    if latencies.iter().all(Option::is_none) {
        if !servers.is_empty() {
            warn!(
                "none of {} servers answered, falling back to {}",
                servers.len(),
                servers[0].name
            );
        }
        return 0;
    }

    let index = closest_index(&latencies);
    info!(
        "closest server: {} ({:?})",
        servers[index].name, latencies[index]
    );
    index
}
