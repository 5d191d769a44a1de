//! Interactive commands and the stdin reader feeding them.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use log::debug;
use tokio::sync::mpsc;

pub const USAGE: &str = "Commands:
  transform <file>   send a file and save the server's reply
  disconnect         close the connection and exit";

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a file through the connection.
    Transform(PathBuf),
    /// Close the connection and exit.
    Disconnect,
    /// Anything else.
    Unknown(String),
}

impl Command {
    /// Parses a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        Some(match (word, rest) {
            ("transform", file) if !file.is_empty() => Command::Transform(PathBuf::from(file)),
            ("disconnect", "") => Command::Disconnect,
            _ => Command::Unknown(line.to_string()),
        })
    }
}

/// Reads stdin on a dedicated thread and forwards parsed commands.
///
/// The channel closes when stdin reaches end of file.
pub fn spawn_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(8);

    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(command) = Command::parse(&line) {
                debug!("command: {:?}", command);
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
        }
    });

    rx
}
