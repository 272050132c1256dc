use chordvault::{
    chord::types::{Channel, Endpoint, NodeId, NodePorts},
    network::{
        node::Peer, tcp::TcpTransport, MaintenanceIntervals, PeerConfig, DEFAULT_CAPACITY,
        DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS,
    },
};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const LOG_PATTERN: &str = "{d(%H:%M:%S%.3f)} {h({l:5})} {t} - {m}{n}";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "chordvault")]
#[command(about = "Peer-to-peer chunked backup over a Chord ring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the first peer of a new ring
    #[command(name = "create")]
    Create {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Join an existing ring through one of its members
    #[command(name = "join")]
    Join {
        #[command(flatten)]
        node: NodeArgs,
        /// Control address of a ring member, e.g. 127.0.0.1:8000
        #[arg(short = 'b', long = "bootstrap")]
        bootstrap: Endpoint,
    },
}

#[derive(Args)]
struct NodeArgs {
    /// Address peers use to reach this node
    #[arg(long = "ip", default_value = "127.0.0.1")]
    ip: IpAddr,
    /// Control port; backup, restore and delete listen on the next three
    #[arg(short = 'p', long = "port", default_value_t = 8000)]
    port: u16,
    /// Ring position (derived from ip:port when omitted)
    #[arg(long = "id")]
    id: Option<NodeId>,
    /// Directory for chunks and metadata (in memory when omitted)
    #[arg(short = 's', long = "storage")]
    storage: Option<PathBuf>,
    /// Storage capacity in bytes
    #[arg(long = "capacity", default_value_t = DEFAULT_CAPACITY)]
    capacity: u64,
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Inbound messages handled concurrently
    #[arg(long = "workers", default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

impl NodeArgs {
    fn into_config(self) -> PeerConfig {
        PeerConfig {
            node_id: self.id,
            ip: self.ip,
            ports: NodePorts::consecutive(self.port),
            storage_dir: self.storage,
            capacity: self.capacity,
            chunk_size: self.chunk_size,
            workers: self.workers,
            intervals: MaintenanceIntervals::default(),
        }
    }
}

fn init_logging(level: LevelFilter, file: Option<&Path>) -> Result<(), String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let mut config =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Some(path) = file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(path)
            .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
        config = config.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    let config = config
        .build(root.build(level))
        .map_err(|e| format!("Invalid logging configuration: {}", e))?;
    log4rs::init_config(config).map_err(|e| format!("Failed to initialize logging: {}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_file.as_deref())?;

    let (args, bootstrap) = match cli.command {
        Commands::Create { node } => (node, None),
        Commands::Join { node, bootstrap } => (node, Some(bootstrap)),
    };

    let peer = Peer::new(args.into_config(), Arc::new(TcpTransport::default()))
        .map_err(|e| format!("Failed to create peer: {}", e))?;
    let server = peer
        .serve_tcp()
        .await
        .map_err(|e| format!("Failed to start listeners: {}", e))?;

    match bootstrap {
        None => {
            peer.create_network();
            info!("New ring created by {}", peer.node());
            info!(
                "Other peers can join with: chordvault join -b {} -p <PORT>",
                peer.node().endpoint(Channel::Control)
            );
        }
        Some(via) => {
            if let Err(e) = peer.join(via, JOIN_TIMEOUT).await {
                error!("Failed to join through {}: {}", via, e);
                server.shutdown().await;
                return Err(format!("Failed to join network: {}", e));
            }
        }
    }
    peer.start_maintenance();

    run_console(&peer).await;

    info!("Leaving the ring...");
    peer.leave().await;
    // let the hand-over messages go out before the runtime stops
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await;
    info!("Node shut down gracefully");
    Ok(())
}

/// Reads commands from stdin until `leave`, end of input or Ctrl+C.
async fn run_console(peer: &Arc<Peer>) {
    info!("Commands: backup <path> <replication> | restore <path> <out> | delete <path> | reclaim <bytes> | state | leave");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to read command: {}", e);
                return;
            }
        };

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["backup", path, replication] => match replication.parse::<u32>() {
                Ok(replication) => match peer.backup(path, replication).await {
                    Ok(file_id) => info!("Backup of {} started as {}", path, file_id),
                    Err(e) => error!("Backup failed: {}", e),
                },
                Err(_) => warn!("Replication must be a number: {}", replication),
            },
            ["restore", path, out] => {
                let (peer, path, out) = (peer.clone(), path.to_string(), out.to_string());
                tokio::spawn(async move {
                    match peer.restore_to(&path, &out).await {
                        Ok(bytes) => info!("Restored {} into {} ({} bytes)", path, out, bytes),
                        Err(e) => error!("Restore failed: {}", e),
                    }
                });
            }
            ["delete", path] => match peer.delete(path) {
                Ok(storers) => info!("Delete of {} sent to {} storer(s)", path, storers),
                Err(e) => error!("Delete failed: {}", e),
            },
            ["reclaim", bytes] => match bytes.parse::<u64>() {
                Ok(capacity) => {
                    let evicted = peer.reclaim(capacity);
                    info!("Reclaim evicted {} chunk(s)", evicted.len());
                }
                Err(_) => warn!("Capacity must be a number of bytes: {}", bytes),
            },
            ["state"] => println!("{}", peer.state()),
            ["leave"] | ["quit"] => return,
            _ => warn!("Unknown command: {}", line),
        }
    }
}
