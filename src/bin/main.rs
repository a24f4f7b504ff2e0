use anyhow::Context;
use clap::Parser;
use rspeed::probe::{probe_all, PROBE_TIMEOUT};
use rspeed::report::{render_human, render_json, render_server_list, render_simple};
use rspeed::{default_servers, probe_closest_server, Client, Config, ProgressEvent, TestKind};
use std::io::Write;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rspeed")]
#[command(about = "Multi-stream HTTP speed test against LibreSpeed servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Probe every server and print its latency, then exit
    #[arg(long)]
    list: bool,

    /// Output the result as JSON
    #[arg(long, conflicts_with = "simple")]
    json: bool,

    /// Output the result on a single line
    #[arg(long)]
    simple: bool,

    /// Number of parallel streams for download and upload (0 keeps the defaults)
    #[arg(short = 'c', long, default_value = "0")]
    concurrent: i32,

    /// Index of the server to use (see --list); probed when omitted
    #[arg(long)]
    server: Option<usize>,

    /// Tests to run: I (IP), D (download), U (upload), P (ping), _ (pause)
    #[arg(long)]
    order: Option<String>,

    /// Download test duration in seconds
    #[arg(long)]
    time_dl: Option<u64>,

    /// Upload test duration in seconds
    #[arg(long)]
    time_ul: Option<u64>,

    /// Report speeds in mebibits per second
    #[arg(long)]
    mebibits: bool,
}

fn print_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::TestStarted(TestKind::Download) => print!("Testing download speed... "),
        ProgressEvent::TestStarted(TestKind::Upload) => print!("Testing upload speed... "),
        ProgressEvent::TestStarted(TestKind::Latency) => print!("Testing latency... "),
        ProgressEvent::SpeedMeasured { result, .. } => println!("{:.2} Mbps", result.mbps),
        ProgressEvent::LatencyMeasured(result) => {
            println!("{:.2} ms (jitter {:.2} ms)", result.ping_ms, result.jitter_ms)
        }
        ProgressEvent::IpResolved(info) => println!("IP: {}", info.processed_string),
        ProgressEvent::Error(msg) => eprintln!("{}", msg),
    }
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let servers = default_servers();

    if cli.list {
        let latencies = probe_all(&reqwest::Client::new(), &servers, PROBE_TIMEOUT).await;
        print!("{}", render_server_list(&servers, &latencies));
        return Ok(());
    }

    let index = match cli.server {
        Some(index) => index,
        None => probe_closest_server(&servers).await,
    };
    let server = servers
        .get(index)
        .with_context(|| format!("no server with index {} (0..{})", index, servers.len()))?;

    let mut config = Config::new().with_server(server).with_mebibits(cli.mebibits);
    if cli.concurrent > 0 {
        config = config.with_streams(cli.concurrent);
    }
    if let Some(order) = cli.order {
        config = config.with_test_order(order);
    }
    if let Some(secs) = cli.time_dl {
        config = config.with_download_time(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.time_ul {
        config = config.with_upload_time(Duration::from_secs(secs));
    }

    let interactive = !cli.json && !cli.simple;
    let mut client = Client::new(config)?;
    if interactive {
        println!("Server: {} ({})", server.name, server.url);
        client = client.with_callback(print_progress);
    }

    let cancel_token = client.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_token.cancel();
        }
    });

    let mut result = client.run().await;
    result.server = Some(server.name.clone());

    if cli.json {
        println!("{}", render_json(&result)?);
    } else if cli.simple {
        println!("{}", render_simple(&result));
    } else {
        println!();
        println!("{}", render_human(&result));
    }

    Ok(())
}
