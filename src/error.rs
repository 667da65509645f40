use thiserror::Error;

/// The error type for rvgate process and transport operations.
///
/// These are local faults: socket setup, polling, configuration and frame
/// decoding. Business outcomes of RPC calls never travel as an `Error`; they
/// are encoded in a [`StatusTuple`](crate::StatusTuple) instead.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided socket address could not be parsed or resolved.
    #[error("Invalid socket address: {0}")]
    InvalidAddress(String),

    /// The master URI could not be split into a host:port pair.
    #[error("Couldn't parse the master URI [{0}] into a host:port pair")]
    InvalidMasterUri(String),

    /// `work()` or `accept_connection()` was called before `bind_and_listen()`.
    #[error("Dispatcher is not listening")]
    NotListening,

    /// `bind_and_listen()` was called while a listening socket is open.
    #[error("Dispatcher is already listening on {0}")]
    AlreadyListening(std::net::SocketAddr),

    /// Internal polling mechanism encountered an error.
    #[error("Poll error: {0}")]
    PollError(String),

    // ============================================================================
    // Frame Errors
    // ============================================================================

    /// Frame header doesn't start with the expected magic bytes.
    #[error("Invalid magic bytes in frame header")]
    InvalidMagicBytes,

    /// Frame protocol version is incompatible with this library version.
    #[error("Protocol version mismatch: expected {expected_major}.{expected_minor}, but frame uses {received_major}.{received_minor}")]
    VersionMismatch {
        expected_major: u8,
        expected_minor: u8,
        received_major: u8,
        received_minor: u8,
    },

    /// Frame body exceeds the configured maximum.
    #[error("Frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Frame data is corrupted or doesn't match the expected format.
    #[error("Malformed frame data: {0}")]
    MalformedData(String),

    // ============================================================================
    // Registry and Configuration Errors
    // ============================================================================

    /// A method with this name is already registered and the registry rejects
    /// duplicates.
    #[error("Method '{0}' is already registered")]
    DuplicateMethod(String),

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid value for the `duplicate_methods` configuration key.
    #[error("Invalid duplicate method policy '{got}', expected one of: {}", .valid.join(", "))]
    InvalidDuplicatePolicy { got: String, valid: Vec<String> },
}

// ============================================================================
// Request Contract Errors
// ============================================================================

/// A request violated the positional parameter contract of its method.
///
/// Raised once at the decoding boundary, before any authorization or
/// forwarding takes place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Wrong number of positional parameters.
    #[error("{method} expects {expected} parameters, got {got}")]
    Arity {
        method: String,
        expected: usize,
        got: usize,
    },

    /// A positional parameter has the wrong tag.
    #[error("{method} parameter {index} ({field}) must be {expected}, got {got}")]
    Type {
        method: String,
        index: usize,
        field: &'static str,
        expected: &'static str,
        got: &'static str,
    },
}

// ============================================================================
// Upstream Errors
// ============================================================================

/// Failure to complete a round trip with the upstream registry.
///
/// A well-formed status tuple from the upstream is never an `UpstreamError`,
/// whatever its code.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Connecting, writing or reading failed.
    #[error("Upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream did not answer within the configured timeout.
    #[error("Upstream call '{method}' timed out")]
    Timeout { method: String },

    /// The upstream closed the connection before answering.
    #[error("Upstream closed the connection")]
    Closed,

    /// The upstream answered with an RPC fault instead of a status tuple.
    #[error("Upstream fault {code}: {message}")]
    Fault { code: i32, message: String },

    /// The upstream answer could not be decoded.
    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

// ============================================================================
// Call Faults
// ============================================================================

/// Fault code for a request that failed parameter decoding.
pub const FAULT_INVALID_PARAMS: i32 = -32602;
/// Fault code for a call to a method that is not registered.
pub const FAULT_UNKNOWN_METHOD: i32 = -32601;
/// Fault code for a call whose upstream round trip failed.
pub const FAULT_UPSTREAM: i32 = -32603;

/// A local fault raised while serving a single call.
///
/// Sent back to the caller as an RPC fault response. The connection stays
/// open.
#[derive(Error, Debug)]
pub enum CallFault {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("No such method: {0}")]
    UnknownMethod(String),
}

impl CallFault {
    /// Returns the fault code sent to the caller.
    pub fn code(&self) -> i32 {
        match self {
            CallFault::Decode(_) => FAULT_INVALID_PARAMS,
            CallFault::Upstream(_) => FAULT_UPSTREAM,
            CallFault::UnknownMethod(_) => FAULT_UNKNOWN_METHOD,
        }
    }
}
