use std::net::TcpListener as StdTcpListener;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use chord_dht::config::ChordConfig;
use chord_dht::node::ChordNode;
use chord_dht::rpc::proto::chord_server::ChordServer;
use chord_dht::rpc::ChordRpc;

/// Chord DHT node: a standalone ring member serving the peer RPC surface
/// consumed by other nodes and by `chord-client`.
#[derive(Parser, Debug)]
#[command(name = "chord-node")]
struct Cli {
    /// Address this node listens on and advertises to the ring, e.g. 127.0.0.1:5000
    #[arg(long)]
    addr: String,

    /// Address of an existing ring member to join through. Omit to create
    /// a brand-new ring.
    #[arg(long)]
    join: Option<String>,

    #[arg(long, default_value_t = 200)]
    stabilize_interval_ms: u64,

    #[arg(long, default_value_t = 200)]
    fix_fingers_interval_ms: u64,

    #[arg(long, default_value_t = 200)]
    fix_predecessor_interval_ms: u64,

    #[arg(long, default_value_t = 10)]
    dial_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    call_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::SimpleLogger::new()
        .env()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let args = Cli::parse();
    let config = ChordConfig {
        stabilize_interval: Duration::from_millis(args.stabilize_interval_ms),
        fix_fingers_interval: Duration::from_millis(args.fix_fingers_interval_ms),
        fix_predecessor_interval: Duration::from_millis(args.fix_predecessor_interval_ms),
        dial_timeout: Duration::from_secs(args.dial_timeout_secs),
        call_timeout: Duration::from_secs(args.call_timeout_secs),
    };

    let socket_addr: std::net::SocketAddr = args.addr.parse().map_err(|e| {
        error!("invalid --addr {}: {}", args.addr, e);
        e
    })?;

    // Bind before Create/Join: peers (and our own first stabilize tick)
    // must be able to reach this node before it advertises itself and
    // starts gossiping, the same ordering the reference implementation's
    // test harness relies on (listen, then Create/Join).
    let std_listener = StdTcpListener::bind(socket_addr).map_err(|e| {
        error!("failed to bind {}: {}", socket_addr, e);
        e
    })?;
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;

    let node = Arc::new(ChordNode::new(args.addr.clone(), config));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    node.set_shutdown_sender(shutdown_tx);

    let rpc_node = Arc::clone(&node);
    let server = tokio::spawn(async move {
        info!("starting gRPC service on {}", socket_addr);
        Server::builder()
            .add_service(ChordServer::new(ChordRpc { node: rpc_node }))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                shutdown_rx.await.ok();
            })
            .await
    });

    match &args.join {
        Some(bootstrap) => {
            if let Err(e) = node.join(bootstrap).await {
                error!("failed to join ring through {}: {}", bootstrap, e);
                exit(1);
            }
        }
        None => node.create().await,
    }

    let quit_node = Arc::clone(&node);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt, leaving the ring");
            quit_node.quit().await;
        }
    });

    server.await??;
    Ok(())
}
