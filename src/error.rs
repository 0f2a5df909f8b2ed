//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Wire-level parse failures are
//! grouped under [`DecodeError`] so callers can drop a malformed datagram
//! with a single match arm.

use std::net::Ipv4Addr;

use crate::lease::HardwareAddr;
use crate::options::MessageType;

/// A datagram could not be decoded as a BOOTP/DHCP message.
///
/// Always recoverable: the offending datagram is dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer than 240 bytes (fixed header plus magic cookie).
    #[error("Packet too short: {len} bytes (minimum 240)")]
    BufferTooSmall { len: usize },

    /// `hlen` larger than the 16-byte `chaddr` field.
    #[error("Invalid hardware address length {0} (maximum 16)")]
    InvalidHardwareLength(u8),

    /// Hop count beyond the relay loop limit.
    #[error("Hop count {0} exceeds maximum 16")]
    TooManyHops(u8),

    /// An option length byte or its value runs past the end of the buffer.
    #[error("Option data truncated")]
    TruncatedOptions,

    /// Option 53 carries a value outside 1..=8.
    #[error("Unknown message type: {0}")]
    InvalidMessageType(u8),

    /// Nothing follows the magic cookie.
    #[error("Packet has no options")]
    NoOptions,
}

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed datagram.
    #[error("Invalid DHCP packet: {0}")]
    Decode(#[from] DecodeError),

    /// A required option is absent.
    #[error("Option {0} not present")]
    MissingOption(u8),

    /// An option is present but its value has the wrong length.
    #[error("Option {code} has {actual} bytes (expected {expected})")]
    InvalidSize {
        code: u8,
        expected: usize,
        actual: usize,
    },

    /// Attempt to store an option that cannot be encoded.
    ///
    /// `Pad` and `End` are structural markers, and values are limited to
    /// 255 bytes by the one-byte length field.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// The magic cookie is missing, so this is plain BOOTP.
    #[error("Not a DHCP packet (magic cookie mismatch)")]
    NotDhcp,

    /// A server only accepts BOOTREQUEST.
    #[error("Expected BOOTREQUEST, got op {0}")]
    NotBootRequest(u8),

    /// The IP address pool is exhausted.
    ///
    /// Every address in the configured range is leased, offered, excluded
    /// or cooling down after a decline.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// No lease exists for the specified client.
    #[error("Client {0} not found in leases")]
    NotFound(HardwareAddr),

    /// A REQUEST names an address this client does not hold.
    #[error("Requested address {requested:?} does not match any lease for this client")]
    LeaseMismatch { requested: Option<Ipv4Addr> },

    /// A client message carries no usable `chaddr` (`hlen` of 0 or all zeros).
    #[error("{0} carries no client hardware address")]
    MissingHardwareAddress(MessageType),

    /// A server-to-client message type arrived at the server.
    #[error("Unexpected message type {0} for a DHCP server")]
    UnexpectedMessageType(MessageType),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., pool_start > pool_end).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
