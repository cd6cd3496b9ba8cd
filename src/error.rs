// MIT License - Copyright (c) 2026 Peter Wright
// Error types

use serde::Serialize;

/// Why a received frame was rejected by the telegram codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FrameError {
    /// Too short, wrong start/end markers or missing secondary start marker.
    #[error("malformed telegram")]
    Malformed,

    /// The two redundant length bytes disagree, or the frame size does not
    /// match the declared length.
    #[error("telegram length mismatch")]
    LengthMismatch,

    #[error("checksum mismatch: expected {expected:#04x}, calculated {calculated:#04x}")]
    ChecksumMismatch { expected: u8, calculated: u8 },
}

/// All errors that can occur in the telenot-gms library.
#[derive(Debug, thiserror::Error)]
pub enum GmsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid area: {area} (areas are numbered from 1 to {max})")]
    InvalidArea { area: u8, max: u8 },

    #[error("Discovery aborted: {reason}")]
    DiscoveryAborted { reason: String },

    #[error("Channel closed")]
    ChannelClosed,
}

impl GmsError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GmsError::Io(_)
                | GmsError::ConnectionTimeout
                | GmsError::Disconnected
                | GmsError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, GmsError>;
