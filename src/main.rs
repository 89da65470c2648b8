//! shmgate: HTTP origin server and reverse proxy with a shared-memory
//! fast path for same-host forwarding.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use shmgate::config::{self, GateConfig};
use shmgate::http::HttpEngine;
use shmgate::lifecycle::{signals, Shutdown};
use shmgate::net::Listener;
use shmgate::observability::init_logging;
use shmgate::origin::OriginService;
use shmgate::pool::ThreadPool;
use shmgate::proxy::{ProxyService, RemoteTranscoder};
use shmgate::shm::{ServerRegistry, SlotPool};
use shmgate::{client, proxy};

#[derive(Parser)]
#[command(name = "shmgate", version, about)]
struct Cli {
    /// Path to a TOML config file; built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the file-serving origin server.
    Origin {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
        /// Override the configured document root.
        #[arg(long)]
        document_root: Option<String>,
    },
    /// Run the reverse proxy.
    Proxy {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the load-generating benchmark client.
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "/index.html")]
        file: String,
        /// Host header to send, for routing through a proxy.
        #[arg(long)]
        forward_host: Option<String>,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 10)]
        loops: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => GateConfig::default(),
    };

    match cli.command {
        Command::Origin {
            port,
            document_root,
        } => {
            if let Some(port) = port {
                config.listener.port = port;
            }
            if let Some(root) = document_root {
                config.origin.document_root = root;
            }
            run_origin(config)
        }
        Command::Proxy { port } => {
            if let Some(port) = port {
                config.listener.port = port;
            }
            run_proxy(config)
        }
        Command::Client {
            host,
            port,
            file,
            forward_host,
            threads,
            loops,
        } => {
            let report = client::run(&client::LoadSpec {
                host,
                port,
                file,
                forward_host,
                threads,
                loops,
            })?;
            println!("{}\t{}", report.elapsed.as_micros(), report.errors);
            println!("Bytes transferred: {}", report.bytes_transferred);
            Ok(())
        }
    }
}

fn run_origin(config: GateConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        port = config.listener.port,
        workers = config.listener.workers,
        queue_capacity = config.listener.queue_capacity,
        document_root = %config.origin.document_root,
        shm = config.shm.enabled,
        "Origin starting"
    );

    let listener = Listener::bind(config.listener.port)?;
    let port = listener.local_addr().port();

    let (slots, registry) = attach_shared(&config)?;
    if let Some(registry) = &registry {
        registry.register(port)?;
    }

    let service = Arc::new(OriginService::new(
        config.origin.document_root.clone(),
        slots,
    ));
    let engine = Arc::new(HttpEngine::new(service));
    let mut pool = ThreadPool::new(listener, config.listener.queue_capacity, engine);
    pool.start_workers(config.listener.workers);
    pool.start_accepting();

    let shutdown = Shutdown::new();
    signals::register(&shutdown)?;
    shutdown.wait();

    tracing::info!("Origin stopping");
    pool.shutdown();
    if let Some(registry) = &registry {
        registry.unregister(port);
    }
    // Dropping the shm handles detaches; the last process out unlinks.
    Ok(())
}

fn run_proxy(config: GateConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        port = config.listener.port,
        upstream_host = %config.proxy.upstream_host,
        upstream_port = config.proxy.upstream_port,
        shm = config.shm.enabled,
        "Proxy starting"
    );

    let listener = Listener::bind(config.listener.port)?;

    let (slots, registry) = attach_shared(&config)?;
    let timeout = Duration::from_secs(config.proxy.upstream_timeout_secs);
    let filter: Option<Arc<dyn proxy::ImageFilter>> = config
        .proxy
        .image_filter_address
        .as_ref()
        .map(|addr| Arc::new(RemoteTranscoder::new(addr.clone(), timeout)) as _);

    let service = Arc::new(ProxyService::new(
        config.proxy.upstream_host.clone(),
        config.proxy.upstream_port,
        timeout,
        registry,
        slots,
        filter,
    ));
    let engine = Arc::new(HttpEngine::new(service));
    let mut pool = ThreadPool::new(listener, config.listener.queue_capacity, engine);
    pool.start_workers(config.listener.workers);
    pool.start_accepting();

    let shutdown = Shutdown::new();
    signals::register(&shutdown)?;
    shutdown.wait();

    tracing::info!("Proxy stopping");
    pool.shutdown();
    Ok(())
}

/// Attach the shared transport segments named by the config.
///
/// Attach failure is a startup failure; a half-working transport would
/// strand SHBUFF peers.
fn attach_shared(
    config: &GateConfig,
) -> Result<(Option<Arc<SlotPool>>, Option<Arc<ServerRegistry>>), Box<dyn std::error::Error>> {
    if !config.shm.enabled {
        return Ok((None, None));
    }
    let slots = SlotPool::open(
        &config.shm.namespace,
        config.shm.slots,
        config.shm.slot_capacity,
    )?;
    let registry = ServerRegistry::open(&config.shm.namespace)?;
    Ok((Some(Arc::new(slots)), Some(Arc::new(registry))))
}
