//! RELDAT server.
//!
//! Serves one client at a time: every payload it receives is sent back
//! uppercased.

mod session;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use reldat::{Config, UdpTransport};
use tokio::net::UdpSocket;

use session::Session;

/// Reliable uppercase server over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// UDP port to listen on.
    port: u16,

    /// Receive window size, in frames.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    window: u32,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = reldat::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Retransmissions allowed before a client is dropped.
    #[arg(long, default_value_t = reldat::DEFAULT_MAX_RETRANSMISSIONS)]
    max_retransmissions: u32,

    /// Largest frame put on the wire, header included.
    #[arg(long, default_value_t = reldat::MAX_FRAME_SIZE)]
    max_frame_size: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::new()
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_max_retransmissions(cli.max_retransmissions)
        .with_max_frame_size(cli.max_frame_size);

    if let Err(err) = config.validate() {
        error!("{}", err);
        return ExitCode::FAILURE;
    }

    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port));
    let mut socket = match UdpSocket::bind(local).await {
        Ok(socket) => socket,
        Err(err) => {
            error!("cannot bind {}: {}", local, err);
            return ExitCode::FAILURE;
        }
    };
    info!("listening on {}, window {}", local, cli.window);

    loop {
        let (client, open) = match session::accept(&socket).await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("receive failed: {}", err);
                return ExitCode::FAILURE;
            }
        };
        info!("OPEN from {}", client);

        let transport = UdpTransport::from_socket(socket, client);
        let mut session = Session::new(transport, cli.window, config);
        match session.run(&open).await {
            Ok(()) => info!("session with {} finished", client),
            Err(err) => warn!("dropping {}: {}", client, err),
        }

        let stats = *session.stats();
        info!(
            "{}: {} frames sent ({} retransmitted), {} received ({} corrupted, {} duplicate)",
            client,
            stats.frames_sent,
            stats.retransmissions,
            stats.frames_received,
            stats.corrupted_frames,
            stats.duplicates
        );

        socket = match session.into_transport().into_socket() {
            Some(socket) => socket,
            None => match UdpSocket::bind(local).await {
                Ok(socket) => socket,
                Err(err) => {
                    error!("cannot rebind {}: {}", local, err);
                    return ExitCode::FAILURE;
                }
            },
        };
    }
}
