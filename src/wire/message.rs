//! Handshake, command headers and batch bodies
//!
//! One connection carries one exchange:
//! ```text
//! client: <version>\n<workload-id>\n
//! server: <version>\n                      (accepted)
//!         REJECT\n<reason>\n               (rejected, connection closed)
//! client: GET_CONFIG\n                     -> <blob: config toml>
//!         GET_SCANPOINTS\n<n>\n            -> <count>\n{<seq>\n<blob>}*
//!         PUT_SCANPOINTS\n<count>\n{<seq>\n<blob>}*   (no reply)
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

use super::codec::{self, WireStream};
use crate::domain::{Assignment, Completion, ScanPoint, ScanResult, SequenceNumber};
use crate::error::ProtocolError;

/// Protocol version line exchanged during the handshake
pub const PROTOCOL_VERSION: &str = "SCANFARM/1";

/// First line of a refused handshake
pub const REJECT_SENTINEL: &str = "REJECT";

const GET_CONFIG: &str = "GET_CONFIG";
const GET_SCANPOINTS: &str = "GET_SCANPOINTS";
const PUT_SCANPOINTS: &str = "PUT_SCANPOINTS";

/// Command header sent by a worker after a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetConfig,
    GetScanPoints { requested: usize },
    PutScanPoints { count: usize },
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GetConfig => GET_CONFIG,
            Command::GetScanPoints { .. } => GET_SCANPOINTS,
            Command::PutScanPoints { .. } => PUT_SCANPOINTS,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::GetConfig => write!(f, "{}", GET_CONFIG),
            Command::GetScanPoints { requested } => write!(f, "{}({})", GET_SCANPOINTS, requested),
            Command::PutScanPoints { count } => write!(f, "{}({})", PUT_SCANPOINTS, count),
        }
    }
}

/// Coordinator-side verdict on a client hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted,
    Rejected(String),
}

/// Send the client hello and wait for the coordinator's verdict.
pub async fn client_handshake<S>(
    wire: &mut WireStream<S>,
    workload_id: &str,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire.write_line(PROTOCOL_VERSION).await?;
    wire.write_line(workload_id).await?;
    wire.flush().await?;

    let reply = wire.read_line().await?;
    if reply == PROTOCOL_VERSION {
        return Ok(());
    }
    if reply == REJECT_SENTINEL {
        let reason = wire.read_line().await?;
        return Err(ProtocolError::Rejected(reason));
    }
    Err(ProtocolError::BadHandshake(reply))
}

/// Read the client hello, answer it and report whether the connection may proceed.
pub async fn server_handshake<S>(
    wire: &mut WireStream<S>,
    workload_id: &str,
) -> Result<HandshakeOutcome, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = wire.read_line().await?;
    let identity = wire.read_line().await?;

    let rejection = if version != PROTOCOL_VERSION {
        Some(format!(
            "protocol version mismatch: coordinator speaks {}, client sent {}",
            PROTOCOL_VERSION, version
        ))
    } else if identity != workload_id {
        Some(format!(
            "workload mismatch: coordinator serves {}, client asked for {}",
            workload_id, identity
        ))
    } else {
        None
    };

    match rejection {
        None => {
            wire.write_line(PROTOCOL_VERSION).await?;
            wire.flush().await?;
            Ok(HandshakeOutcome::Accepted)
        }
        Some(reason) => {
            wire.write_line(REJECT_SENTINEL).await?;
            wire.write_line(&reason).await?;
            wire.flush().await?;
            Ok(HandshakeOutcome::Rejected(reason))
        }
    }
}

/// Write a command header (the PUT body follows separately).
pub async fn write_command<S>(wire: &mut WireStream<S>, command: Command) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire.write_line(command.as_str()).await?;
    match command {
        Command::GetConfig => {}
        Command::GetScanPoints { requested } => wire.write_line(&requested.to_string()).await?,
        Command::PutScanPoints { count } => wire.write_line(&count.to_string()).await?,
    }
    Ok(())
}

pub async fn read_command<S>(wire: &mut WireStream<S>) -> Result<Command, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let word = wire.read_line().await?;
    match word.as_str() {
        GET_CONFIG => Ok(Command::GetConfig),
        GET_SCANPOINTS => Ok(Command::GetScanPoints {
            requested: wire.read_number("requested count").await?,
        }),
        PUT_SCANPOINTS => Ok(Command::PutScanPoints {
            count: wire.read_number("result count").await?,
        }),
        _ => Err(ProtocolError::UnknownCommand(word)),
    }
}

/// Write a `GET_SCANPOINTS` reply body.
pub async fn write_assignments<S>(
    wire: &mut WireStream<S>,
    assignments: &[Assignment],
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire.write_line(&assignments.len().to_string()).await?;
    for assignment in assignments {
        wire.write_line(&assignment.seq.to_string()).await?;
        wire.write_blob(assignment.point.as_bytes()).await?;
    }
    Ok(())
}

pub async fn read_assignments<S>(wire: &mut WireStream<S>) -> Result<Vec<Assignment>, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let count: usize = wire.read_number("scan point count").await?;
    let mut assignments = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let seq: SequenceNumber = wire.read_number("sequence number").await?;
        let bytes = wire.read_blob().await?;
        let text = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        assignments.push(Assignment::new(seq, ScanPoint::new(text)));
    }
    Ok(assignments)
}

/// Write the `PUT_SCANPOINTS` header followed by every completion.
pub async fn write_completions<S>(
    wire: &mut WireStream<S>,
    completions: &[Completion],
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(
        wire,
        Command::PutScanPoints {
            count: completions.len(),
        },
    )
    .await?;
    for completion in completions {
        wire.write_line(&completion.seq.to_string()).await?;
        let body = encode_result(&completion.result).await?;
        wire.write_blob(&body).await?;
    }
    Ok(())
}

/// Read `count` `(seq, result)` pairs following a `PUT_SCANPOINTS` header.
pub async fn read_completions<S>(
    wire: &mut WireStream<S>,
    count: usize,
) -> Result<Vec<Completion>, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut completions = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let seq: SequenceNumber = wire.read_number("sequence number").await?;
        let body = wire.read_blob().await?;
        let result = decode_result(&body, wire.max_blob_bytes()).await?;
        completions.push(Completion::new(seq, result));
    }
    Ok(completions)
}

// Counts come off the wire; don't trust them for allocation.
const MAX_PREALLOC: usize = 1024;

/// Encode a result as `<channels>\n{<name>\n<blob>}*`.
pub async fn encode_result(result: &ScanResult) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(result.payload_bytes() + 16 * result.len() + 8);
    codec::write_line(&mut out, &result.len().to_string()).await?;
    for (name, payload) in result.channels() {
        codec::write_line(&mut out, name).await?;
        codec::write_blob(&mut out, payload).await?;
    }
    Ok(out)
}

pub async fn decode_result(mut bytes: &[u8], max_blob_bytes: usize) -> Result<ScanResult, ProtocolError> {
    let reader = &mut bytes;
    let channels: usize = codec::read_number(reader, "channel count").await?;
    let mut result = ScanResult::new();
    for _ in 0..channels {
        let name = codec::read_line(reader).await?;
        let payload = codec::read_blob(reader, max_blob_bytes).await?;
        result.insert(name, payload);
    }
    Ok(result)
}
