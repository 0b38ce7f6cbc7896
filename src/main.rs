//! Node bootstrap.
//!
//! ```text
//! blocknet <listen_addr> [--name <id>] [--peer <addr>]... [--validator]
//! ```
//!
//! Starts one node: a TCP transport bound to `listen_addr`, a server
//! processing its inbound messages, and optional outbound connections to
//! seed peers. `--validator` enables block production with a fresh key.

use blocknet::network::server::{Server, ServerOpts};
use blocknet::network::tcp_transport::TcpTransport;
use blocknet::network::transport::Transport;
use blocknet::{error, info};
use blocknet::crypto::key_pair::PrivateKey;
use std::net::SocketAddr;
use std::process;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

const USAGE: &str = "\
blocknet node

USAGE:
    blocknet <listen_addr> [OPTIONS]

ARGS:
    <listen_addr>    Address to bind, e.g. 127.0.0.1:3000

OPTIONS:
    --name <id>      Node identifier for logs (defaults to the address)
    --peer <addr>    Seed peer to connect to; may be repeated
    --validator      Produce blocks with a freshly generated key
    -h, --help       Print this help
";

const BLOCK_TIME: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPTS: u32 = 5;

struct Args {
    listen_addr: SocketAddr,
    name: String,
    seed_peers: Vec<SocketAddr>,
    validator: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        eprint!("{USAGE}");
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let listen_addr = args[1].parse().unwrap_or_else(|_| {
        eprintln!("invalid listen address: {}", args[1]);
        process::exit(1);
    });

    let mut name = None;
    let mut seed_peers = Vec::new();
    let mut validator = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                i += 1;
                name = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--name requires an argument");
                    process::exit(1);
                }));
            }
            "--peer" => {
                i += 1;
                let raw = args.get(i).unwrap_or_else(|| {
                    eprintln!("--peer requires an argument");
                    process::exit(1);
                });
                match raw.parse() {
                    Ok(addr) => seed_peers.push(addr),
                    Err(_) => {
                        eprintln!("invalid peer address: {raw}");
                        process::exit(1);
                    }
                }
            }
            "--validator" => validator = true,
            other => {
                eprintln!("unexpected argument: {other}\n");
                eprint!("{USAGE}");
                process::exit(1);
            }
        }
        i += 1;
    }

    Args {
        listen_addr,
        name: name.unwrap_or_else(|| args[1].clone()),
        seed_peers,
        validator,
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let (transport, peer_events) = TcpTransport::new(args.listen_addr);

    let mut server = Server::new(ServerOpts {
        id: args.name.clone(),
        transports: vec![transport.clone()],
        peer_events: Some(peer_events),
        private_key: args.validator.then(PrivateKey::new),
        pool_capacity: None,
        block_time: BLOCK_TIME,
        storage: None,
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("server failed: {e}");
            process::exit(1);
        }
    });

    // Give the listener a moment to come up before dialing out.
    sleep(Duration::from_millis(100)).await;
    info!("node '{}' listening on {}", args.name, transport.addr());

    for peer in args.seed_peers {
        let mut delay = Duration::from_millis(200);
        for attempt in 1..=CONNECT_ATTEMPTS {
            match transport.connect(peer).await {
                Ok(()) => break,
                Err(e) => {
                    error!("connect to {peer} failed (attempt {attempt}/{CONNECT_ATTEMPTS}): {e}");
                    if attempt < CONNECT_ATTEMPTS {
                        sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to install ctrl-c handler: {e}");
        return;
    }
    info!("shutting down");
    transport.shutdown();
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
}
