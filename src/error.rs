//! Error types shared across the crate.

use std::net::SocketAddr;

use thiserror::Error;

use crate::ports::interface::InterfaceError;

/// Failure to decode a wire unit into a typed frame.
///
/// Anything in here is local to a single frame: the dispatcher drops the
/// frame, possibly emits a diagnostic log line, and keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("not a complete frame array: got {0} bytes")]
    Length(usize),

    #[error("unknown frame category in byte 0: {0:#04x}")]
    UnknownCategory(u8),

    #[error("invalid DLC {0}")]
    InvalidDlc(u8),

    #[error("identifier {0:#x} out of range")]
    InvalidIdentifier(u32),

    #[error("payload length {0} is not representable as a DLC")]
    InvalidPayloadLength(usize),

    #[error("flag conflict: {0}")]
    FlagConflict(&'static str),

    #[error("unknown API function code {0}")]
    UnknownApiFunction(u32),

    #[error("malformed {0} payload")]
    InvalidPayload(&'static str),
}

/// Failure of a network-level operation.
///
/// Unlike [`FrameError`], these are surfaced to the caller: capacity limits,
/// lifecycle misuse and hardware faults all end up here.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("session limit of {0} reached")]
    TooManyClients(usize),

    #[error("network is already enabled")]
    AlreadyEnabled,

    #[error("no free network id left")]
    NetworkLimit,

    #[error("failed to bind TCP listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("hardware interface slot is already occupied")]
    InterfaceBusy,

    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;
