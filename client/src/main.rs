//! Interactive RELDAT client.
//!
//! Opens a connection, then sends files to the server on request and saves
//! whatever the server sends back.

mod commands;
mod files;

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use reldat::{Config, Connection, Error};

use commands::Command;

/// Reliable file transform client over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server address (e.g. 127.0.0.1:8000).
    peer: SocketAddr,

    /// Receive window size, in frames.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    window: u32,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = reldat::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Retransmissions allowed before the server is declared unreachable.
    #[arg(long, default_value_t = reldat::DEFAULT_MAX_RETRANSMISSIONS)]
    max_retransmissions: u32,

    /// Largest frame put on the wire, header included.
    #[arg(long, default_value_t = reldat::MAX_FRAME_SIZE)]
    max_frame_size: usize,
}

impl Cli {
    fn config(&self) -> Config {
        Config::new()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retransmissions(self.max_retransmissions)
            .with_max_frame_size(self.max_frame_size)
    }
}

enum Event {
    Command(Option<Command>),
    Idle(reldat::Result<()>),
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let mut conn = match Connection::open(cli.peer, cli.window, cli.config()).await {
        Ok(conn) => conn,
        Err(err) => {
            error!("open failed: {}", err);
            println!("Server unreachable.");
            return ExitCode::FAILURE;
        }
    };
    println!("Connected to {}.", cli.peer);

    let mut commands = commands::spawn_reader();
    prompt();

    loop {
        let event = tokio::select! {
            biased;
            command = commands.recv() => Event::Command(command),
            idle = conn.service_idle() => Event::Idle(idle),
        };

        match event {
            Event::Idle(Ok(())) => continue,
            Event::Idle(Err(Error::PeerClosed)) => {
                println!("Server closed the connection.");
                return ExitCode::SUCCESS;
            }
            Event::Idle(Err(err)) => {
                error!("{}", err);
                println!("Lost connection to the server.");
                return ExitCode::FAILURE;
            }
            Event::Command(None) | Event::Command(Some(Command::Disconnect)) => {
                return disconnect(&mut conn).await;
            }
            Event::Command(Some(Command::Unknown(line))) => {
                println!("Unknown command '{}'.\n{}", line, commands::USAGE);
            }
            Event::Command(Some(Command::Transform(path))) => {
                if let Err(err) = transform(&mut conn, &path).await {
                    error!("{}", err);
                    println!("Lost connection to the server.");
                    return ExitCode::FAILURE;
                }
            }
        }

        prompt();
    }
}

/// Sends one file. Only connection failures are returned; file problems are
/// reported and the prompt carries on.
async fn transform(conn: &mut Connection, path: &Path) -> reldat::Result<()> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) => {
            println!("Cannot read {}: {}", path.display(), err);
            return Ok(());
        }
    };

    let reply = conn.exchange(&data).await?;

    let output = files::received_path(path);
    match tokio::fs::write(&output, &reply).await {
        Ok(()) => println!("Saved {} bytes to {}.", reply.len(), output.display()),
        Err(err) => println!("Cannot write {}: {}", output.display(), err),
    }

    let stats = conn.stats();
    info!(
        "sent {} frames ({} retransmitted), received {} frames ({} corrupted)",
        stats.frames_sent, stats.retransmissions, stats.frames_received, stats.corrupted_frames
    );
    Ok(())
}

async fn disconnect(conn: &mut Connection) -> ExitCode {
    println!("Disconnecting...");
    match conn.close().await {
        Ok(()) => {
            println!("Disconnected.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!("close failed: {}", err);
            println!("Server did not answer the disconnect.");
            ExitCode::FAILURE
        }
    }
}
