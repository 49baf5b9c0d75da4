//! The downstream Graphite-line sink writer.
//!
//! One TCP connection per flush, never pooled: dial, set a write deadline,
//! write the whole buffer in a single call, close. Failures are reported to
//! the caller (the aggregator), which logs them and resets state regardless;
//! this module never retries.

use crate::errors::FlushError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Dials `addr`, writes `buffer` under `deadline`, and closes. `deadline` is
/// the time budget for the dial *and* the write combined, mirroring the
/// spec's "deadline equal to the flush-tick time plus flush_interval".
pub async fn write_flush(addr: &str, buffer: &[u8], deadline: Duration) -> Result<(), FlushError> {
    let mut stream = timeout(deadline, TcpStream::connect(addr))
        .await
        .map_err(|_| FlushError::Dial {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"),
        })?
        .map_err(|source| FlushError::Dial {
            addr: addr.to_string(),
            source,
        })?;

    timeout(deadline, stream.write_all(buffer))
        .await
        .map_err(|_| {
            FlushError::Write(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ))
        })?
        .map_err(FlushError::Write)?;

    Ok(())
}
