//! TCP Line Protocol Operation
//!
//! One round trip is: resolve the address, connect, build a request line,
//! send it and wait for the first reply byte, read the reply line, drop the
//! request, close the connection.
//!
//! Requests are `PING` (fast probe) or `SLEEP <secs>` (slow simulation).
//! Replies are `OK ...` or `ERR <code> <message>`; anything else is a
//! protocol error.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::config::OperationKind;
use crate::error::OperationError;

use super::{unsupported, Operation, Phase, PhaseClock, PhaseMeasurement};

/// Round trips over a plain TCP connection.
#[derive(Debug, Clone)]
pub struct TcpOperation {
    slow_delay: Duration,
}

impl TcpOperation {
    /// Creates an operation whose slow simulation asks the service to
    /// wait `slow_delay` before replying.
    pub fn new(slow_delay: Duration) -> Self {
        Self { slow_delay }
    }

    fn request_line(&self, kind: OperationKind) -> Result<String, OperationError> {
        match kind {
            OperationKind::FastProbe => Ok("PING\n".to_string()),
            OperationKind::SlowSimulation => Ok(format!("SLEEP {}\n", self.slow_delay.as_secs())),
            other => Err(unsupported(other)),
        }
    }
}

impl Operation for TcpOperation {
    fn execute(&self, target: &str, kind: OperationKind) -> Result<PhaseMeasurement, OperationError> {
        let mut clock = PhaseClock::start();

        let addr = resolve(target)?;
        clock.lap(Phase::ConnectionCreate);

        let stream = TcpStream::connect(addr)?;
        clock.lap(Phase::ConnectionOpen);

        let request = self.request_line(kind)?;
        clock.lap(Phase::CommandCreate);

        let mut writer = stream.try_clone()?;
        writer.write_all(request.as_bytes())?;
        writer.flush()?;
        let mut reader = BufReader::new(stream);
        if reader.fill_buf()?.is_empty() {
            return Err(closed_before_reply());
        }
        clock.lap(Phase::ExecuteFirstRow);

        let mut reply = String::new();
        reader.read_line(&mut reply)?;
        parse_reply(&reply)?;
        clock.lap(Phase::RowRead);

        drop(request);
        drop(reply);
        clock.lap(Phase::CommandTeardown);

        // The peer may already have closed its side.
        let _ = writer.shutdown(Shutdown::Both);
        drop(writer);
        drop(reader);
        clock.lap(Phase::ConnectionTeardown);

        Ok(clock.finish())
    }

    async fn execute_async(
        &self,
        target: &str,
        kind: OperationKind,
    ) -> Result<PhaseMeasurement, OperationError> {
        let mut clock = PhaseClock::start();

        let addr = resolve_async(target).await?;
        clock.lap(Phase::ConnectionCreate);

        let stream = tokio::net::TcpStream::connect(addr).await?;
        clock.lap(Phase::ConnectionOpen);

        let request = self.request_line(kind)?;
        clock.lap(Phase::CommandCreate);

        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(request.as_bytes()).await?;
        write_half.flush().await?;
        let mut reader = tokio::io::BufReader::new(read_half);
        if reader.fill_buf().await?.is_empty() {
            return Err(closed_before_reply());
        }
        clock.lap(Phase::ExecuteFirstRow);

        let mut reply = String::new();
        reader.read_line(&mut reply).await?;
        parse_reply(&reply)?;
        clock.lap(Phase::RowRead);

        drop(request);
        drop(reply);
        clock.lap(Phase::CommandTeardown);

        let _ = write_half.shutdown().await;
        drop(write_half);
        drop(reader);
        clock.lap(Phase::ConnectionTeardown);

        Ok(clock.finish())
    }
}

fn resolve(target: &str) -> Result<SocketAddr, OperationError> {
    target
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| OperationError::Protocol(format!("no address for target '{}'", target)))
}

async fn resolve_async(target: &str) -> Result<SocketAddr, OperationError> {
    tokio::net::lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| OperationError::Protocol(format!("no address for target '{}'", target)))
}

fn closed_before_reply() -> OperationError {
    OperationError::Protocol("connection closed before reply".to_string())
}

/// Interprets one reply line.
pub(crate) fn parse_reply(line: &str) -> Result<(), OperationError> {
    let line = line.trim_end();
    if line == "OK" || line.starts_with("OK ") {
        return Ok(());
    }

    if let Some(rest) = line.strip_prefix("ERR ") {
        let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
        let code = code
            .parse::<i32>()
            .map_err(|_| OperationError::Protocol(format!("malformed error reply: {}", line)))?;
        debug!("Service replied with error {}", code);
        return Err(OperationError::Driver {
            code,
            message: message.to_string(),
        });
    }

    Err(OperationError::Protocol(format!("unexpected reply: {}", line)))
}
