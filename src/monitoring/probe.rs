//! Probe Monitor
//!
//! Keeps one long-lived connection to the target and periodically logs
//! the service's session status. Failures are logged and the whole
//! connection is retried after a fixed backoff, until the run stops. A
//! templated target names several destinations, which one connection
//! cannot represent, so the probe refuses to start for it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ConnectivityError;

use super::sleep_or_stop;

/// Default pause between status queries.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Default pause before reconnecting after a failure.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(20);

/// Number of sessions in one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Opens probe sessions.
pub trait ProbeConnector: Send + Sync + 'static {
    type Session: ProbeSession;

    fn connect(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<Self::Session, ConnectivityError>> + Send;
}

/// An open probe connection.
pub trait ProbeSession: Send + 'static {
    fn query_status(
        &mut self,
    ) -> impl Future<Output = Result<Vec<StatusCount>, ConnectivityError>> + Send;
}

/// Probe timing.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub sample_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// What the probe did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub connections: u64,
    pub failures: u64,
    pub samples: u64,
}

/// Handle to the running probe task.
pub struct ProbeMonitor {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<ProbeStats>>,
}

impl ProbeMonitor {
    /// A probe that never runs.
    pub fn disabled() -> Self {
        Self {
            stop_tx: None,
            handle: None,
        }
    }

    /// Starts probing `target`, unless it is a template.
    pub fn start<C: ProbeConnector>(
        runtime: &Handle,
        connector: C,
        target: &str,
        settings: ProbeSettings,
    ) -> Self {
        if target.contains('{') {
            warn!(
                "Probe: unable to monitor several targets at once ('{}' is a template); probe disabled",
                target
            );
            return Self::disabled();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(run_probe(connector, target.to_string(), settings, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the probe and waits for it. Idempotent.
    pub fn stop(&mut self, runtime: &Handle) -> ProbeStats {
        let Some(handle) = self.handle.take() else {
            return ProbeStats::default();
        };
        info!("Probe: stopping...");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        let stats = runtime.block_on(handle).unwrap_or_default();
        info!("Probe: stopped!");
        stats
    }
}

async fn run_probe<C: ProbeConnector>(
    connector: C,
    target: String,
    settings: ProbeSettings,
    mut stop: watch::Receiver<bool>,
) -> ProbeStats {
    let mut stats = ProbeStats::default();

    while !*stop.borrow() {
        info!("Probe: connecting to {}...", target);
        match probe_session(&connector, &target, &settings, &mut stop, &mut stats).await {
            Ok(()) => break,
            Err(e) => {
                stats.failures += 1;
                warn!(
                    "Probe: unable to monitor because of error (will retry in {}s): {}",
                    settings.reconnect_backoff.as_secs(),
                    e
                );
            }
        }
        if sleep_or_stop(&mut stop, settings.reconnect_backoff).await {
            break;
        }
    }

    stats
}

/// Runs one connection until stopped (`Ok`) or until it fails.
async fn probe_session<C: ProbeConnector>(
    connector: &C,
    target: &str,
    settings: &ProbeSettings,
    stop: &mut watch::Receiver<bool>,
    stats: &mut ProbeStats,
) -> Result<(), ConnectivityError> {
    let mut session = connector.connect(target).await?;
    stats.connections += 1;

    loop {
        let statuses = session.query_status().await?;
        stats.samples += 1;
        info!("{}", StatusLine(&statuses));

        if sleep_or_stop(stop, settings.sample_interval).await {
            return Ok(());
        }
    }
}

struct StatusLine<'a>(&'a [StatusCount]);

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Probe: ")?;
        for entry in self.0 {
            write!(f, "\"{}\": {};", entry.status, entry.count)?;
        }
        Ok(())
    }
}

/// Probes over the TCP line protocol.
///
/// Sends `STATUS` and expects `<status> <count>` lines terminated by an
/// empty line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbeConnector;

pub struct TcpProbeSession {
    reader: BufReader<TcpStream>,
}

impl ProbeConnector for TcpProbeConnector {
    type Session = TcpProbeSession;

    async fn connect(&self, target: &str) -> Result<TcpProbeSession, ConnectivityError> {
        let stream = TcpStream::connect(target)
            .await
            .map_err(ConnectivityError::Connect)?;
        Ok(TcpProbeSession {
            reader: BufReader::new(stream),
        })
    }
}

impl ProbeSession for TcpProbeSession {
    async fn query_status(&mut self) -> Result<Vec<StatusCount>, ConnectivityError> {
        self.reader
            .get_mut()
            .write_all(b"STATUS\n")
            .await
            .map_err(ConnectivityError::Query)?;

        let mut statuses = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(ConnectivityError::Query)?;
            if read == 0 {
                return Err(ConnectivityError::Query(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during status reply",
                )));
            }
            let line = line.trim();
            if line.is_empty() {
                return Ok(statuses);
            }
            statuses.push(parse_status_line(line)?);
        }
    }
}

fn parse_status_line(line: &str) -> Result<StatusCount, ConnectivityError> {
    let (status, count) = line
        .rsplit_once(' ')
        .ok_or_else(|| ConnectivityError::Malformed(line.to_string()))?;
    let count = count
        .parse()
        .map_err(|_| ConnectivityError::Malformed(line.to_string()))?;
    Ok(StatusCount {
        status: status.trim().to_string(),
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tokio::runtime::Runtime;

    fn fast_settings() -> ProbeSettings {
        ProbeSettings {
            sample_interval: Duration::from_millis(10),
            reconnect_backoff: Duration::from_millis(10),
        }
    }

    struct FailingConnector {
        attempts: Arc<AtomicU64>,
    }

    impl ProbeConnector for FailingConnector {
        type Session = FixedSession;

        async fn connect(&self, _target: &str) -> Result<FixedSession, ConnectivityError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ConnectivityError::Connect(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    struct FixedConnector;

    struct FixedSession;

    impl ProbeConnector for FixedConnector {
        type Session = FixedSession;

        async fn connect(&self, _target: &str) -> Result<FixedSession, ConnectivityError> {
            Ok(FixedSession)
        }
    }

    impl ProbeSession for FixedSession {
        async fn query_status(&mut self) -> Result<Vec<StatusCount>, ConnectivityError> {
            Ok(vec![StatusCount {
                status: "running".to_string(),
                count: 3,
            }])
        }
    }

    #[test]
    fn test_refuses_templated_target() {
        let runtime = Runtime::new().unwrap();
        let mut probe = ProbeMonitor::start(
            runtime.handle(),
            FixedConnector,
            "db{nr}:7878",
            fast_settings(),
        );
        assert!(!probe.is_active());
        assert_eq!(probe.stop(runtime.handle()), ProbeStats::default());
    }

    #[test]
    fn test_retries_after_failures() {
        let runtime = Runtime::new().unwrap();
        let attempts = Arc::new(AtomicU64::new(0));
        let mut probe = ProbeMonitor::start(
            runtime.handle(),
            FailingConnector {
                attempts: Arc::clone(&attempts),
            },
            "127.0.0.1:1",
            fast_settings(),
        );
        assert!(probe.is_active());

        thread::sleep(Duration::from_millis(150));
        let stats = probe.stop(runtime.handle());
        assert!(stats.failures >= 2, "expected retries, got {:?}", stats);
        assert_eq!(stats.failures, attempts.load(Ordering::SeqCst));
        assert_eq!(stats.connections, 0);
        assert!(!probe.is_active());
    }

    #[test]
    fn test_samples_until_stopped() {
        let runtime = Runtime::new().unwrap();
        let mut probe =
            ProbeMonitor::start(runtime.handle(), FixedConnector, "127.0.0.1:1", fast_settings());

        thread::sleep(Duration::from_millis(100));
        let stats = probe.stop(runtime.handle());
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.failures, 0);
        assert!(stats.samples >= 2);

        // Stopping twice is harmless.
        assert_eq!(probe.stop(runtime.handle()), ProbeStats::default());
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line("running 4").unwrap(),
            StatusCount {
                status: "running".to_string(),
                count: 4
            }
        );
        assert_eq!(parse_status_line("waiting for lock 2").unwrap().status, "waiting for lock");
        assert!(parse_status_line("running").is_err());
        assert!(parse_status_line("running many").is_err());
    }

    #[test]
    fn test_status_line_format() {
        let statuses = vec![
            StatusCount {
                status: "running".to_string(),
                count: 1,
            },
            StatusCount {
                status: "sleeping".to_string(),
                count: 7,
            },
        ];
        assert_eq!(
            StatusLine(&statuses).to_string(),
            "Probe: \"running\": 1;\"sleeping\": 7;"
        );
    }

    #[tokio::test]
    async fn test_tcp_session_reads_status_block() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "STATUS\n");
            let mut writer = stream;
            writer.write_all(b"running 2\nsleeping 5\n\n").unwrap();
        });

        let mut session = TcpProbeConnector.connect(&addr).await.unwrap();
        let statuses = session.query_status().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].count, 5);
    }
}
