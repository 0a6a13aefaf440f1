//! Error types for the SOCKS5 engine
//!
//! Every failure a connection can hit maps onto one `Socks5Error` variant so
//! the negotiation and request layers can decide which reply, if any, the
//! client gets before the connection closes.

use std::io;
use thiserror::Error;

/// Result alias used across the protocol engine
pub type Result<T> = std::result::Result<T, Socks5Error>;

/// SOCKS5 protocol and connection errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Greeting or request carried a version other than 5
    #[error("protocol version not supported: {0}")]
    VersionNotSupported(u8),

    /// Username/password sub-negotiation carried a version other than 1
    #[error("sub-negotiation method version not supported: {0}")]
    MethodVersionNotSupported(u8),

    /// BIND, or a command byte outside the known set
    #[error("request command not supported: {0}")]
    CommandNotSupported(u8),

    /// RSV byte of a request was not zero
    #[error("invalid reserved field: {0}")]
    InvalidReservedField(u8),

    #[error("address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// None of the client's offered methods matched the configured one
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("username/password authentication failed")]
    PasswordAuthFailure,

    /// Password authentication configured without a checker
    #[error("password checker not set")]
    PasswordCheckerNotSet,

    /// Any failure to open the outbound connection
    #[error("connection refused")]
    ConnectionRefused,

    #[error("failed to resolve host: {0}")]
    ResolutionFailed(String),

    /// Handshake did not complete within the configured timeout
    #[error("handshake timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
