//! Wire codec for RPC calls and responses.
//!
//! The dispatcher only talks to the [`WireCodec`] trait, so the byte-level
//! format is pluggable. [`FramedCodec`] is the built-in implementation: a
//! length-prefixed frame with a bincode body.

mod frame;

use crate::error::Error;
use crate::value::{RpcValue, StatusTuple};
use bincode::{Decode, Encode};

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One decoded RPC call.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<RpcValue>,
    /// Whether the connection should stay open after the response.
    pub keep_alive: bool,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Vec<RpcValue>) -> Self {
        Self {
            method: method.into(),
            params,
            keep_alive: true,
        }
    }

    pub fn closing(mut self) -> Self {
        self.keep_alive = false;
        self
    }
}

/// The answer to one [`RpcCall`].
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum RpcResponse {
    /// A business outcome, successful or not.
    Status(StatusTuple),
    /// A local fault: bad parameters, unknown method, failed upstream.
    Fault { code: i32, message: String },
}

/// Turns bytes into calls and responses into bytes.
///
/// Implementations must be stateless across connections; the dispatcher
/// shares one instance between all of them.
pub trait WireCodec: Send + Sync {
    /// Decodes the first complete call in `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete call, and
    /// the number of bytes consumed otherwise. An `Err` closes the connection.
    fn decode_call(&self, buf: &[u8]) -> Result<Option<(RpcCall, usize)>, Error>;

    /// Encodes a response for the wire.
    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, Error>;
}

/// Length-prefixed frames with a bincode body.
///
/// Also provides the client side ([`Self::encode_call`] and
/// [`Self::decode_response`]), used by the upstream client and by tests.
#[derive(Debug, Clone, Copy)]
pub struct FramedCodec {
    max_frame_size: usize,
}

impl FramedCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn encode_call(&self, call: &RpcCall) -> Result<Vec<u8>, Error> {
        frame::encode_frame(call)
    }

    pub fn decode_response(&self, buf: &[u8]) -> Result<Option<(RpcResponse, usize)>, Error> {
        frame::decode_frame(buf, self.max_frame_size)
    }
}

impl Default for FramedCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl WireCodec for FramedCodec {
    fn decode_call(&self, buf: &[u8]) -> Result<Option<(RpcCall, usize)>, Error> {
        frame::decode_frame(buf, self.max_frame_size)
    }

    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, Error> {
        frame::encode_frame(response)
    }
}
