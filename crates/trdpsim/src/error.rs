// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by trdpsim operations.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by registry, loader, and engine operations.
///
/// The codec never produces errors: malformed fields are skipped and
/// decode to unset values instead.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// XML configuration missing, unreadable, or unparsable.
    ConfigInvalid(String),
    /// I/O failure while reading a configuration source.
    Io(std::io::Error),

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Telegram registration referenced a dataset that is not registered.
    UnknownDataset(String),
    /// Operation referenced a comId with no registered telegram/endpoint.
    UnknownTelegram(u32),
    /// Operation requires the opposite transfer direction for this comId.
    WrongDirection(u32),

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The session or binding for this endpoint failed to come up.
    NotReady(u32),
    /// The native stack reported an error code.
    Stack(i32),
    /// An MD reply or confirm deadline elapsed.
    Timeout,
    /// DNR is not configured or the stack does not provide it.
    DnrUnavailable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::UnknownDataset(name) => write!(f, "Dataset not registered: {}", name),
            Error::UnknownTelegram(com_id) => write!(f, "Unknown ComId {}", com_id),
            Error::WrongDirection(com_id) => {
                write!(f, "ComId {} has the wrong direction for this operation", com_id)
            }
            Error::NotReady(com_id) => {
                write!(f, "Endpoint for ComId {} is not ready", com_id)
            }
            Error::Stack(code) => write!(f, "TRDP stack error code {}", code),
            Error::Timeout => write!(f, "MD reply or confirm timed out"),
            Error::DnrUnavailable => write!(f, "DNR lookups are not available"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::UnknownTelegram(42).to_string(),
            "Unknown ComId 42"
        );
        assert_eq!(
            Error::UnknownDataset("speed".into()).to_string(),
            "Dataset not registered: speed"
        );
        assert!(Error::Stack(-7).to_string().contains("-7"));
    }

    #[test]
    fn test_io_source_chain() {
        use std::error::Error as _;
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
    }
}
