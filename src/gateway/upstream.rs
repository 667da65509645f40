use crate::codec::{FramedCodec, RpcCall, RpcResponse};
use crate::config::{GatewaySettings, MasterAddress};
use crate::error::UpstreamError;
use crate::value::{RpcValue, StatusTuple};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

const READ_CHUNK_SIZE: usize = 4096;

/// The registry calls are forwarded to.
///
/// Whatever status tuple the registry returns is passed back verbatim. Only
/// a failed round trip is an error.
pub trait Upstream: Send + Sync {
    fn execute(&self, method: &str, params: &[RpcValue]) -> Result<StatusTuple, UpstreamError>;
}

/// Blocking client for an upstream registry speaking [`FramedCodec`].
///
/// Keeps one connection open between calls and reconnects after a fault.
/// Every read and write is bounded by the configured timeout.
#[derive(Debug)]
pub struct TcpUpstream {
    address: MasterAddress,
    timeout: Duration,
    codec: FramedCodec,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpUpstream {
    pub fn new(address: MasterAddress, timeout: Duration, max_frame_size: usize) -> Self {
        Self {
            address,
            timeout,
            codec: FramedCodec::new(max_frame_size),
            stream: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self::new(
            settings.upstream.clone(),
            settings.upstream_timeout,
            settings.max_frame_size,
        )
    }

    pub fn address(&self) -> &MasterAddress {
        &self.address
    }

    fn connect(&self) -> Result<TcpStream, UpstreamError> {
        let mut last_err = None;
        for addr in self.address.socket_addr_string().to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "Connected to upstream");
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(%addr, ?err, "Upstream connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    ErrorKind::NotFound,
                    format!("{} resolved to no address", self.address.socket_addr_string()),
                )
            })
            .into())
    }

    fn send(
        &self,
        stream: &mut TcpStream,
        method: &str,
        params: &[RpcValue],
    ) -> Result<(), UpstreamError> {
        let call = RpcCall::new(method, params.to_vec());
        let buf = self
            .codec
            .encode_call(&call)
            .map_err(|err| UpstreamError::Malformed(err.to_string()))?;
        stream.write_all(&buf).map_err(|err| io_error(method, err))
    }

    fn receive(&self, stream: &mut TcpStream, method: &str) -> Result<StatusTuple, UpstreamError> {
        let mut recv_buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let decoded = self
                .codec
                .decode_response(&recv_buf)
                .map_err(|err| UpstreamError::Malformed(err.to_string()))?;
            if let Some((response, _)) = decoded {
                return match response {
                    RpcResponse::Status(status) => Ok(status),
                    RpcResponse::Fault { code, message } => {
                        Err(UpstreamError::Fault { code, message })
                    }
                };
            }

            match stream.read(&mut chunk) {
                Ok(0) => return Err(UpstreamError::Closed),
                Ok(sz) => {
                    trace!(len = sz, "Read upstream data");
                    recv_buf.extend_from_slice(&chunk[..sz]);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_error(method, err)),
            }
        }
    }

    /// Sends on the cached connection if it is still usable, else on a fresh
    /// one. Only a failed send is retried: once the call is on the wire the
    /// registry may have acted on it.
    fn call(
        &self,
        cached: Option<TcpStream>,
        method: &str,
        params: &[RpcValue],
    ) -> Result<(StatusTuple, TcpStream), UpstreamError> {
        let cached = cached.filter(|stream| {
            let alive = is_idle_and_open(stream);
            if !alive {
                debug!(method, "Idle upstream connection went away, reconnecting");
            }
            alive
        });

        let mut stream = match cached {
            Some(mut stream) => match self.send(&mut stream, method, params) {
                Ok(()) => stream,
                Err(UpstreamError::Io(err)) => {
                    debug!(method, ?err, "Send on reused upstream connection failed, reconnecting");
                    let mut stream = self.connect()?;
                    self.send(&mut stream, method, params)?;
                    stream
                }
                Err(err) => return Err(err),
            },
            None => {
                let mut stream = self.connect()?;
                self.send(&mut stream, method, params)?;
                stream
            }
        };

        let status = self.receive(&mut stream, method)?;
        Ok((status, stream))
    }
}

impl Upstream for TcpUpstream {
    #[instrument(skip(self, params), fields(upstream = %self.address.socket_addr_string()))]
    fn execute(&self, method: &str, params: &[RpcValue]) -> Result<StatusTuple, UpstreamError> {
        let mut guard = self.stream.lock().unwrap_or_else(PoisonError::into_inner);

        match self.call(guard.take(), method, params) {
            Ok((status, stream)) => {
                debug!(method, code = status.code, "Upstream answered");
                *guard = Some(stream);
                Ok(status)
            }
            Err(err) => {
                warn!(method, %err, "Upstream call failed");
                Err(err)
            }
        }
    }
}

// An idle connection has nothing to read. End of stream, stray bytes or a
// pending error all mean the registry is done with it.
fn is_idle_and_open(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    let idle = matches!(stream.peek(&mut byte), Err(err) if err.kind() == ErrorKind::WouldBlock);
    stream.set_nonblocking(false).is_ok() && idle
}

fn io_error(method: &str, err: io::Error) -> UpstreamError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => UpstreamError::Timeout {
            method: method.to_string(),
        },
        _ => UpstreamError::Io(err),
    }
}
