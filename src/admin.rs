//! The admin TCP server: a line-oriented control protocol used to
//! query adaptive sample-rate advice for a bucket. One task per connection;
//! the window task itself never touches a socket, so all connection I/O
//! for the admin protocol stays here.

use crate::errors::{DaemonError, DaemonResult};
use crate::window::SampleRateRequest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

const HELP_TEXT: &str = "commands: help, ideal_sample_rate <bucket>\n";

pub async fn run(admin_addr: String, requests_tx: mpsc::Sender<SampleRateRequest>) -> DaemonResult<()> {
    let listener = TcpListener::bind(&admin_addr)
        .await
        .map_err(|source| DaemonError::AdminBind {
            addr: admin_addr.clone(),
            source,
        })?;
    info!(addr = admin_addr, "admin server listening");

    loop {
        let (socket, peer) = listener.accept().await.map_err(|source| DaemonError::AdminBind {
            addr: admin_addr.to_string(),
            source,
        })?;
        let requests_tx = requests_tx.clone();
        tokio::spawn(async move {
            debug!(%peer, "admin connection accepted");
            if let Err(source) = handle_connection(socket, requests_tx).await {
                error!(%peer, %source, "admin connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    requests_tx: mpsc::Sender<SampleRateRequest>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let arg = parts.next().map(str::trim).unwrap_or("");

        match command {
            "help" => {
                writer.write_all(HELP_TEXT.as_bytes()).await?;
            }
            "ideal_sample_rate" => {
                if arg.is_empty() {
                    writer.write_all(b"invalid request\n").await?;
                    writer.write_all(HELP_TEXT.as_bytes()).await?;
                    continue;
                }
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = SampleRateRequest {
                    bucket: arg.to_string(),
                    reply: reply_tx,
                };
                if requests_tx.send(request).await.is_err() {
                    error!("observation window channel closed, cannot serve request");
                    break;
                }
                match reply_rx.await {
                    Ok(rate) => {
                        writer
                            .write_all(format!("{} {:.6}\n", arg, rate).as_bytes())
                            .await?;
                    }
                    Err(_) => {
                        error!("observation window dropped reply sender");
                        break;
                    }
                }
                // One reply per connection, then close.
                break;
            }
            "" => {
                // Blank line between commands; keep the connection open.
            }
            _ => {
                writer.write_all(b"unknown command\n").await?;
                writer.write_all(HELP_TEXT.as_bytes()).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt as _, BufReader as TokioBufReader};
    use tokio::time::Duration;

    async fn spawn_server() -> (String, mpsc::Receiver<SampleRateRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (requests_tx, requests_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let requests_tx = requests_tx.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, requests_tx).await;
                });
            }
        });

        (addr, requests_rx)
    }

    #[tokio::test]
    async fn help_command_keeps_connection_open() {
        let (addr, _requests_rx) = spawn_server().await;
        let stream = TcpStream::connect(&addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = TokioBufReader::new(reader).lines();

        writer.write_all(b"help\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("commands:"));

        // Connection should still be open: a second command works too.
        writer.write_all(b"bogus\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, "unknown command");
    }

    #[tokio::test]
    async fn ideal_sample_rate_forwards_request_and_closes() {
        let (addr, mut requests_rx) = spawn_server().await;

        let responder = tokio::spawn(async move {
            let request = requests_rx.recv().await.unwrap();
            assert_eq!(request.bucket, "hot");
            request.reply.send(0.25).unwrap();
        });

        let stream = TcpStream::connect(&addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = TokioBufReader::new(reader).lines();

        writer.write_all(b"ideal_sample_rate hot\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, "hot 0.250000");

        // Server closes after the reply; next read returns EOF (None).
        let eof = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert!(eof.is_none());

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn missing_argument_is_rejected() {
        let (addr, _requests_rx) = spawn_server().await;
        let stream = TcpStream::connect(&addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = TokioBufReader::new(reader).lines();

        writer.write_all(b"ideal_sample_rate\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, "invalid request");
    }
}
