use std::str::FromStr;

use log::{debug, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{broadcast, watch},
};

use super::backend::Notification;
use crate::{model::Hash256, Result};

/// Parses one notification line, `block [<hash>]` or `tx [<txid>]`, as sent
/// by the node's `-blocknotify`/`-walletnotify` hooks.
pub fn parse_notification(line: &str) -> Option<Notification> {
    let mut parts = line.split_whitespace();
    let kind = parts.next()?;
    let hash = match parts.next() {
        Some(h) => Some(Hash256::from_str(h).ok()?),
        None => None,
    };
    match kind {
        "block" | "hashblock" => Some(Notification::NewBlock(hash)),
        "tx" | "hashtx" => Some(Notification::NewTx(hash)),
        _ => None,
    }
}

/// Accepts connections on `endpoint` and forwards every parsed line to
/// `sender` until `shutdown` flips.
pub async fn run_notify_listener(
    endpoint: String,
    sender: broadcast::Sender<Notification>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&endpoint).await?;
    info!("Listening for node notifications on {endpoint}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("notification connection from {peer}");
                tokio::spawn(forward_lines(stream, sender.clone()));
            }
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

async fn forward_lines(stream: TcpStream, sender: broadcast::Sender<Notification>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_notification(&line) {
                // No receivers is fine, the follower may not be tailing yet.
                Some(notification) => {
                    let _ = sender.send(notification);
                }
                None => warn!("ignoring malformed notification {line:?}"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!("notification connection closed: {e}");
                break;
            }
        }
    }
}
