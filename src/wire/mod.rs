//! Wire protocol between coordinator and workers

pub mod codec;
pub mod message;

pub use codec::{WireStream, DEFAULT_MAX_BLOB_BYTES, MAX_LINE_BYTES};
pub use message::{
    client_handshake, read_assignments, read_command, read_completions, server_handshake,
    write_assignments, write_command, write_completions, Command, HandshakeOutcome,
    PROTOCOL_VERSION, REJECT_SENTINEL,
};
