//! The UDP ingester: binds the StatsD listen socket, parses each
//! datagram, and publishes every resulting event to the aggregator and the
//! observation window. Both publications are the sole backpressure
//! mechanism: a full aggregator channel blocks the ingester rather
//! than silently dropping a parsed event.

use crate::errors::{DaemonError, DaemonResult};
use crate::metrics::{DATAGRAMS_RECEIVED, LINES_REJECTED};
use crate::model::Event;
use crate::parser::parse_packet;
use crate::window::Observation;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const MAX_DATAGRAM_LEN: usize = 512;

pub async fn run(
    listen_addr: &str,
    events_tx: mpsc::Sender<Event>,
    observations_tx: mpsc::Sender<Observation>,
) -> DaemonResult<()> {
    let socket = UdpSocket::bind(listen_addr)
        .await
        .map_err(|source| DaemonError::UdpBind {
            addr: listen_addr.to_string(),
            source,
        })?;
    info!(addr = listen_addr, "UDP ingester listening");
    run_on_socket(socket, events_tx, observations_tx).await;
    Ok(())
}

async fn run_on_socket(
    socket: UdpSocket,
    events_tx: mpsc::Sender<Event>,
    observations_tx: mpsc::Sender<Observation>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _peer)) => {
                DATAGRAMS_RECEIVED.inc();
                let events = parse_packet(&buf[..len]);
                if events.is_empty() && len > 0 {
                    LINES_REJECTED.with_label_values(&["unparseable"]).inc();
                }
                for event in events {
                    let observation = Observation {
                        bucket: event.bucket.clone(),
                        sampling: event.sampling,
                    };
                    // Both sends block on a full channel by design;
                    // dropping at the kernel UDP buffer is preferable to
                    // silently discarding an already-parsed event.
                    if events_tx.send(event).await.is_err() {
                        debug!("aggregator channel closed, stopping ingest");
                        return;
                    }
                    if observations_tx.send(observation).await.is_err() {
                        debug!("observation window channel closed, stopping ingest");
                        return;
                    }
                }
            }
            Err(source) => {
                error!(%source, "UDP read error, continuing");
            }
        }
    }
}
