//! Coordinator client — one fresh connection per request, bounded retry

use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{AppConfig, WorkerConfig};
use crate::domain::{Assignment, Completion};
use crate::error::{Result, ScanError};
use crate::wire::{self, Command, WireStream, DEFAULT_MAX_BLOB_BYTES};

/// Client side of the three coordinator commands
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    addr: String,
    workload_id: String,
    max_retries: u32,
    retry_delay: Duration,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_blob_bytes: usize,
}

impl CoordinatorClient {
    pub fn new(workload_id: impl Into<String>, config: &WorkerConfig) -> Self {
        Self {
            addr: config.coordinator_addr(),
            workload_id: workload_id.into(),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
        }
    }

    pub fn with_max_blob_bytes(mut self, max_blob_bytes: usize) -> Self {
        self.max_blob_bytes = max_blob_bytes;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Download the coordinator's configuration tree (`GET_CONFIG`).
    pub async fn fetch_config(&self) -> Result<AppConfig> {
        let text = self
            .with_retry("GET_CONFIG", || self.try_fetch_config())
            .await?;
        Ok(AppConfig::from_toml_str(&text)?)
    }

    /// Ask for up to `requested` scan points (`GET_SCANPOINTS`).
    pub async fn get_scan_points(&self, requested: usize) -> Result<Vec<Assignment>> {
        self.with_retry("GET_SCANPOINTS", || self.try_get_scan_points(requested))
            .await
    }

    /// Push a finished batch (`PUT_SCANPOINTS`).
    ///
    /// The coordinator sends no reply; a clean close of its side is the
    /// acknowledgement.
    pub async fn put_scan_points(&self, completions: &[Completion]) -> Result<()> {
        self.with_retry("PUT_SCANPOINTS", || self.try_put_scan_points(completions))
            .await
    }

    async fn connect(&self) -> Result<WireStream<TcpStream>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                ScanError::Timeout(format!(
                    "connecting to {} took longer than {}ms",
                    self.addr,
                    self.connect_timeout.as_millis()
                ))
            })??;
        stream.set_nodelay(true)?;

        let mut wire = WireStream::new(stream).with_max_blob_bytes(self.max_blob_bytes);
        wire::client_handshake(&mut wire, &self.workload_id).await?;
        Ok(wire)
    }

    async fn try_fetch_config(&self) -> Result<String> {
        let mut wire = self.connect().await?;
        wire::write_command(&mut wire, Command::GetConfig).await?;
        wire.flush().await?;
        let blob = wire.read_blob().await?;
        String::from_utf8(blob)
            .map_err(|_| ScanError::Protocol(crate::error::ProtocolError::InvalidUtf8))
    }

    async fn try_get_scan_points(&self, requested: usize) -> Result<Vec<Assignment>> {
        let mut wire = self.connect().await?;
        wire::write_command(&mut wire, Command::GetScanPoints { requested }).await?;
        wire.flush().await?;
        Ok(wire::read_assignments(&mut wire).await?)
    }

    async fn try_put_scan_points(&self, completions: &[Completion]) -> Result<()> {
        let mut wire = self.connect().await?;
        wire::write_completions(&mut wire, completions).await?;
        wire.shutdown().await?;
        wire.wait_for_close().await?;
        Ok(())
    }

    /// Run `attempt` up to `max_retries` times, each bounded by the I/O timeout.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            attempts += 1;

            let outcome = match timeout(self.io_timeout, attempt()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ScanError::Timeout(format!(
                    "no answer within {}ms",
                    self.io_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempts);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{} attempt {} failed: {}", operation, attempts, e);
                    last_error = Some(e);

                    if attempts < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(ScanError::RetriesExhausted {
            operation,
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    fn worker_config(port: u16) -> WorkerConfig {
        WorkerConfig {
            host: "127.0.0.1".into(),
            port,
            max_retries: 3,
            retry_delay_ms: 10,
            connect_timeout_ms: 500,
            io_timeout_ms: 500,
            ..WorkerConfig::default()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let client = CoordinatorClient::new("w", &worker_config(closed_port().await));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = client
            .with_retry("ping", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ScanError::Internal("nope".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ScanError::RetriesExhausted {
                operation,
                attempts,
                last_error,
            } => {
                assert_eq!(operation, "ping");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let client = CoordinatorClient::new("w", &worker_config(closed_port().await));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = client
            .with_retry("ping", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ScanError::Internal("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_is_fatal() {
        let client = CoordinatorClient::new("w", &worker_config(closed_port().await));
        let err = client.get_scan_points(5).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::RetriesExhausted {
                operation: "GET_SCANPOINTS",
                attempts: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = worker_config(listener.local_addr().unwrap().port());
        config.max_retries = 1;
        config.io_timeout_ms = 50;
        let client = CoordinatorClient::new("w", &config);

        // Accepts but never answers the handshake
        let _hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let err = client.get_scan_points(1).await.unwrap_err();
        match err {
            ScanError::RetriesExhausted { last_error, .. } => {
                assert!(last_error.contains("no answer"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
