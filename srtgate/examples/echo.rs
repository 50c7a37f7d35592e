use std::{sync::Arc, thread, time::Duration};

use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use srtgate::{
    Client, ClientHandler, ClientOptions, ConnectionEvent, EventRouter, Server, ServerEvent,
    ServerOptions,
};

#[derive(Parser, Clone)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    addr: String,
    #[arg(long, default_value_t = 9000)]
    port: u16,
    /// "server" or "client"
    #[arg(long)]
    kind: String,
    #[arg(long, default_value = "demo")]
    stream_id: String,
    #[arg(long)]
    passphrase: Option<String>,
}

struct Events;

impl ClientHandler for Events {
    fn on_connected(&self) {
        log::info!("client connected");
    }

    fn on_disconnected(&self) {
        log::info!("client disconnected");
    }

    fn on_error(&self, message: &str) {
        log::error!("client error: {}", message);
    }
}

fn run_server(args: &Args) -> Result<(), anyhow::Error> {
    let (router, events) = EventRouter::new();
    let server = Server::run(
        &args.addr,
        args.port,
        ServerOptions {
            passphrase: args.passphrase.clone(),
            latency: None,
        },
        router.clone(),
    )?;

    while let Ok(event) = events.recv() {
        match event {
            ServerEvent::ConnectRequest { peer, stream_id } => {
                log::info!("connect request, peer={}, stream_id={}", peer, stream_id);

                let id = server
                    .awaiting_connect_request_id()
                    .ok_or(anyhow!("no connect request pending"))?;
                let connection = router.register(id);
                server.answer_connect_request(true)?;

                thread::spawn(move || {
                    while let Ok(event) = connection.recv() {
                        match event {
                            ConnectionEvent::Connected { stream_id } => {
                                log::info!("connection ready, id={}, stream_id={}", id, stream_id)
                            }
                            ConnectionEvent::Data(data) => {
                                log::info!("received, id={}, size={}", id, data.len())
                            }
                            ConnectionEvent::Disconnected => break,
                        }
                    }
                });
            }
            ServerEvent::Unrouted { id, .. } => log::warn!("unrouted event, id={}", id),
            ServerEvent::FatalError(message) => {
                log::error!("server failed: {}", message);
                break;
            }
        }
    }

    server.stop();
    Ok(())
}

fn run_client(args: &Args) -> Result<(), anyhow::Error> {
    let client = Client::run(
        &args.addr,
        args.port,
        ClientOptions {
            stream_id: args.stream_id.clone(),
            passphrase: args.passphrase.clone(),
            ..Default::default()
        },
        Arc::new(Events),
    )?;

    for index in 0u64..100 {
        client.send(Bytes::from(index.to_be_bytes().to_vec()))?;
        thread::sleep(Duration::from_millis(100));
    }

    if let Some(stats) = client.read_socket_stats(true) {
        log::info!(
            "sent={}, rate={}mbps",
            stats.pkt_sent_total,
            stats.mbps_send_rate
        );
    }

    client.stop();
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    common::logger::init_logger(log::LevelFilter::Info, None)?;

    if !srtgate::startup() {
        return Err(anyhow!("failed to start the srt runtime"));
    }

    let args = Args::parse();
    if args.kind == "server" {
        run_server(&args)?;
    } else {
        run_client(&args)?;
    }

    srtgate::cleanup();
    Ok(())
}
