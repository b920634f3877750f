// src/error.rs

use thiserror::Error;

/// The primary error type for the `smx-rs` library.
#[derive(Error, Debug)]
pub enum SmxError {
    #[error("Pad is not connected")]
    NotConnected,

    #[error("A device handle is already open on this connection")]
    HandleInUse,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unknown sensor test mode: {0:#04x}")]
    UnknownSensorMode(u8),
}

pub type Result<T> = std::result::Result<T, SmxError>;
