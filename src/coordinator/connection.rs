//! One accepted connection: handshake, one command, close

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::command::DispatchHandle;
use crate::error::{Result, ScanError};
use crate::wire::{self, Command, HandshakeOutcome, WireStream};
use crate::worker::estimator::MAX_BATCH;

/// Everything a connection task needs, cheap to clone
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub handle: DispatchHandle,
    pub workload_id: Arc<str>,
    /// Serialized configuration tree served by `GET_CONFIG`
    pub config_text: Arc<str>,
    pub io_timeout: Duration,
    pub max_blob_bytes: usize,
}

/// Serve one connection; failures only ever end this connection.
pub async fn serve_connection<S>(stream: S, peer: SocketAddr, ctx: ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(ctx.io_timeout, exchange(stream, peer, &ctx)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%peer, "Connection aborted: {}", e),
        Err(_) => warn!(
            %peer,
            "Connection timed out after {}ms",
            ctx.io_timeout.as_millis()
        ),
    }
}

pub(crate) async fn exchange<S>(stream: S, peer: SocketAddr, ctx: &ConnectionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut wire = WireStream::new(stream).with_max_blob_bytes(ctx.max_blob_bytes);

    if let HandshakeOutcome::Rejected(reason) =
        wire::server_handshake(&mut wire, &ctx.workload_id).await?
    {
        warn!(%peer, "Rejected client: {}", reason);
        wire.shutdown().await?;
        return Ok(());
    }

    let command = wire::read_command(&mut wire).await?;
    debug!(%peer, "Serving {}", command);

    match command {
        Command::GetConfig => {
            wire.write_blob(ctx.config_text.as_bytes()).await?;
        }
        Command::GetScanPoints { requested } => {
            let batch = ctx.handle.take_batch(requested.min(MAX_BATCH)).await?;
            wire::write_assignments(&mut wire, &batch).await?;
            debug!(%peer, "Sent {} of {} requested scan points", batch.len(), requested);
        }
        Command::PutScanPoints { count } => {
            if count > MAX_BATCH {
                return Err(ScanError::Protocol(crate::error::ProtocolError::InvalidNumber {
                    field: "result count",
                    value: count.to_string(),
                }));
            }
            let completions = wire::read_completions(&mut wire, count).await?;
            let report = ctx.handle.complete(completions).await?;
            debug!(
                %peer,
                "Accepted {} results, discarded {}",
                report.accepted, report.discarded
            );
        }
    }

    wire.shutdown().await?;
    Ok(())
}
