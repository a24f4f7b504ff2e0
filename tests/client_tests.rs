mod common;

use common::{unreachable_base, TestServer};
use rspeed::{Client, Config, ProgressCallback, ProgressEvent, ServerDescriptor, TestKind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Callback collecting every event it sees
struct TestCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestCallback {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgressCallback for TestCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn local_config(server: &TestServer) -> Config {
    Config::new()
        .with_server(&ServerDescriptor::new("local", server.base()))
        .with_download_time(Duration::from_secs(1))
        .with_upload_time(Duration::from_secs(1))
        .with_streams(2)
        .with_stream_delay(Duration::from_millis(50))
        .with_upload_payload_size(64 * 1024)
        .with_count_ping(3)
        .with_transfer_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_download() {
    let server = TestServer::start().await;
    let client = Client::new(local_config(&server)).unwrap();

    let result = client.run_download().await;

    assert!(result.mbps > 0.0);
    assert!(result.samples > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mebibit_output_is_scaled() {
    let server = TestServer::start().await;
    let client = Client::new(local_config(&server).with_mebibits(true)).unwrap();

    let result = client.run_download().await;
    let plain = rspeed::measurements::speed_mbps(result.total_bytes, result.elapsed, 1.06, false);

    assert!((result.mbps - plain * 1_000_000.0 / 1_048_576.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_latency() {
    let server = TestServer::with_ping_delay(Duration::from_millis(20)).await;
    let client = Client::new(local_config(&server).with_count_ping(4)).unwrap();

    let result = client.run_latency().await;

    assert_eq!(result.samples, 4);
    assert!(result.ping_ms >= 20.0);
    assert!(result.jitter_ms >= 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_ip_info_json() {
    let server = TestServer::start().await;
    let client = Client::new(local_config(&server)).unwrap();

    let info = client.get_ip_info().await.unwrap();

    assert_eq!(info.processed_string, "127.0.0.1 - localhost");
    assert_eq!(info.raw_isp_info["isp"], "loopback");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_ip_info_plain_text() {
    let server = TestServer::start().await;
    let mut config = local_config(&server);
    config.url_get_ip = server.url("getIP-text.php");
    let client = Client::new(config).unwrap();

    let info = client.get_ip_info().await.unwrap();

    assert_eq!(info.processed_string, "127.0.0.1");
    assert!(info.raw_isp_info.is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_ip_info_error_status() {
    let server = TestServer::start().await;
    let mut config = local_config(&server);
    config.url_get_ip = server.url("status500.php");
    let client = Client::new(config).unwrap();

    assert!(client.get_ip_info().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_run_with_callback() {
    let server = TestServer::start().await;
    let callback = TestCallback::new();
    let events_ref = callback.events.clone();
    let client = Client::new(local_config(&server).with_test_order("IDUP"))
        .unwrap()
        .with_callback(callback);

    let result = client.run().await;

    assert_eq!(result.client_ip, "127.0.0.1 - localhost");
    assert!(result.download_mbps > 0.0);
    assert!(result.upload_mbps > 0.0);
    assert!(result.ping_ms > 0.0);

    let events = events_ref.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::IpResolved(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::TestStarted(TestKind::Download))));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::SpeedMeasured {
            kind: TestKind::Upload,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::LatencyMeasured(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_order_runs_each_test_once() {
    let server = TestServer::start().await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let client = Client::new(
        local_config(&server)
            .with_test_order("PP_xP")
            .with_count_ping(1),
    )
    .unwrap()
    .with_callback(move |event: ProgressEvent| sink.lock().unwrap().push(event));

    let result = client.run().await;

    let events = events.lock().unwrap();
    let latency_runs = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::TestStarted(TestKind::Latency)))
        .count();
    assert_eq!(latency_runs, 1);
    assert_eq!(result.download_mbps, 0.0);
    assert_eq!(result.upload_mbps, 0.0);
    assert!(result.ping_ms > 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_server_run() {
    let config = Config::new()
        .with_server(&ServerDescriptor::new("nowhere", unreachable_base()))
        .with_test_order("IDP")
        .with_download_time(Duration::from_millis(500))
        .with_streams(2)
        .with_stream_delay(Duration::from_millis(50))
        .with_transfer_timeout(Duration::from_secs(1))
        .with_ping_timeout(Duration::from_secs(1))
        .with_count_ping(2);
    let client = Client::new(config).unwrap();

    let started = Instant::now();
    let result = client.run().await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.client_ip, "Unknown");
    assert_eq!(result.download_mbps, 0.0);
    assert_eq!((result.ping_ms, result.jitter_ms), (0.0, 0.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_token_stops_download() {
    let server = TestServer::start().await;
    let client = Client::new(local_config(&server).with_download_time(Duration::from_secs(30))).unwrap();

    let cancel_token = client.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        cancel_token.cancel();
    });

    let started = Instant::now();
    let result = client.run_download().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.elapsed < Duration::from_secs(5));
}

#[test]
fn test_invalid_url_is_rejected() {
    let mut config = Config::new();
    config.url_download = "not a url".to_string();
    assert!(matches!(Client::new(config), Err(rspeed::Error::Url(_))));
}
