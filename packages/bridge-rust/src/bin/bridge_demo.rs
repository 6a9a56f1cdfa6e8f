//! Drives the bridge against the in-memory backend.
//!
//! Runs one storage request through save, download URL and delete, then
//! fetches the instance id, printing each outcome.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pollbridge::backends::memory::{Latency, MemoryApp, MemoryFactory, MemoryHost};
use pollbridge::request::RequestEvent;
use pollbridge::{AppOptions, BridgeConfig, BridgeRuntime};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bridge-demo")]
#[command(about = "Run storage and instance-id requests through the completion bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Completion scan interval in milliseconds
    #[arg(
        long,
        env = "POLLBRIDGE_POLL_INTERVAL_MS",
        default_value_t = 250,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_ms: u64,

    /// Host readiness probe interval in milliseconds
    #[arg(
        long,
        env = "POLLBRIDGE_INIT_INTERVAL_MS",
        default_value_t = 250,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    init_interval_ms: u64,

    /// Simulated backend latency in milliseconds (0 settles immediately)
    #[arg(long, default_value_t = 400)]
    latency_ms: u64,

    /// Delay before the simulated host reports ready, in milliseconds
    #[arg(long, default_value_t = 600)]
    host_delay_ms: u64,

    /// Storage bucket name
    #[arg(long, env = "POLLBRIDGE_BUCKET", default_value = "demo-bucket")]
    bucket: String,

    /// Object path to write, link and delete
    #[arg(long, default_value = "demo/hello.txt")]
    path: String,

    /// Text content to upload
    #[arg(long, default_value = "hello from pollbridge")]
    content: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pollbridge::logging::init();
    let cli = Cli::parse();

    let config = BridgeConfig {
        poll_interval_ms: cli.poll_interval_ms,
        init_interval_ms: cli.init_interval_ms,
        ..BridgeConfig::default()
    };
    let options = AppOptions {
        app_id: Some("bridge-demo".to_string()),
        storage_bucket: Some(cli.bucket.clone()),
        ..AppOptions::default()
    };
    let latency = if cli.latency_ms == 0 {
        Latency::Immediate
    } else {
        Latency::Delayed(Duration::from_millis(cli.latency_ms))
    };

    let host = Arc::new(MemoryHost::new(false));
    let app = Arc::new(MemoryApp::from_options(&options, latency));
    let factory = Arc::new(MemoryFactory::new(app));
    let runtime = BridgeRuntime::start(config, options, host.clone(), factory)?;

    let delay = Duration::from_millis(cli.host_delay_ms);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        info!("simulated host ready");
        host.set_ready(true);
    });
    runtime.ready().await?;

    let storage = runtime.storage().request();
    let mut events = storage.subscribe();

    storage.stage(&cli.path)?.write_text(&cli.content)?;
    let ok = await_completion(&mut events).await?;
    println!("save {}: success={ok} error={}", cli.path, storage.error_id());

    storage.stage(&cli.path)?.fetch_url()?;
    let ok = await_completion(&mut events).await?;
    println!("url  {}: success={ok} url={}", cli.path, storage.download_url());

    storage.stage(&cli.path)?.remove()?;
    let ok = await_completion(&mut events).await?;
    println!("del  {}: success={ok} error={}", cli.path, storage.error_id());

    // Deleting again reports ObjectNotFound.
    storage.stage(&cli.path)?.remove()?;
    let ok = await_completion(&mut events).await?;
    println!(
        "del  {}: success={ok} error={:?} message={:?}",
        cli.path,
        storage.error(),
        storage.error_message()
    );

    let iid = runtime.instance_id().request();
    let mut iid_events = iid.subscribe();
    iid.exec()?;
    let ok = await_completion(&mut iid_events).await?;
    println!("iid: success={ok} id={}", iid.instance_id());

    runtime.shutdown().await
}

/// Waits for the next `Completed` event of a request.
async fn await_completion(events: &mut broadcast::Receiver<RequestEvent>) -> anyhow::Result<bool> {
    loop {
        match events.recv().await {
            Ok(RequestEvent::Completed { success }) => return Ok(success),
            Ok(RequestEvent::RunningChanged { .. }) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "request events lagged"),
            Err(RecvError::Closed) => anyhow::bail!("request dropped before completion"),
        }
    }
}
