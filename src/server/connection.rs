//! Per-client request/response state machine.

use super::client_info::CallerIdentity;
use super::registry::{CallContext, MethodRegistry};
use crate::codec::{RpcCall, RpcResponse, WireCodec};
use crate::error::CallFault;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use tracing::{debug, error, info, trace, warn};

/// Where a connection is in its request/response cycle.
///
/// `Reading` -> `Dispatching` -> `Writing` -> `Reading` (keep-alive) or
/// `Closed`. `Closed` is terminal; an I/O fault in any state goes straight
/// there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Reading,
    Dispatching,
    Writing,
    Closed,
}

// Internal data type for flush
enum FlushResult {
    Done,
    Pending,
    Failed,
}

/// Borrowed server state needed to serve one readiness event.
pub(crate) struct ConnectionContext<'a> {
    pub(crate) methods: &'a MethodRegistry,
    pub(crate) caller: &'a CallerIdentity,
    pub(crate) codec: &'a dyn WireCodec,
    pub(crate) poll_registry: &'a Registry,
}

/// One accepted client connection.
///
/// Owns its socket and buffers. Calls on the same connection are served
/// strictly in arrival order, one at a time.
#[derive(Debug)]
pub(crate) struct ServerConnection {
    id: usize,
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: ConnectionState,
    interest: Interest,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_pos: usize,
    keep_alive: bool,
    peer_closed: bool,
    max_read_size: usize,
    calls_served: usize,
}

impl ServerConnection {
    pub(crate) fn new(
        id: usize,
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_read_size: usize,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            state: ConnectionState::Reading,
            interest: Interest::READABLE,
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
            send_pos: 0,
            keep_alive: true,
            peer_closed: false,
            max_read_size,
            calls_served: 0,
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, Token(self.id), self.interest)
    }

    /// Deregisters and shuts the socket down. The socket closes on drop.
    pub(crate) fn close(&mut self, registry: &Registry) {
        if let Err(err) = registry.deregister(&mut self.stream) {
            debug!(id = self.id, ?err, "Deregistering closed connection failed");
        }
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            trace!(id = self.id, ?err, "Socket shutdown failed");
        }
        self.state = ConnectionState::Closed;
        info!(id = self.id, peer_addr = %self.peer_addr, calls = self.calls_served, "Closed connection");
    }

    /// Serves one readiness event and returns the resulting state.
    ///
    /// Reads whatever is available, then drives as many complete cycles as
    /// the buffered bytes and the socket's write capacity allow.
    pub(crate) fn handle_event(
        &mut self,
        readable: bool,
        ctx: &ConnectionContext<'_>,
    ) -> ConnectionState {
        if self.state == ConnectionState::Closed {
            return self.state;
        }

        if readable && !self.peer_closed && !self.read_available() {
            self.state = ConnectionState::Closed;
            return self.state;
        }

        loop {
            match self.state {
                ConnectionState::Reading => match ctx.codec.decode_call(&self.recv_buf) {
                    Ok(Some((call, used))) => {
                        self.recv_buf.drain(..used);
                        self.state = ConnectionState::Dispatching;
                        let response = self.dispatch(call, ctx);
                        match ctx.codec.encode_response(&response) {
                            Ok(buf) => {
                                self.send_buf = buf;
                                self.send_pos = 0;
                                self.state = ConnectionState::Writing;
                            }
                            Err(err) => {
                                error!(id = self.id, ?err, "Failed to encode response");
                                self.state = ConnectionState::Closed;
                            }
                        }
                    }
                    Ok(None) => {
                        if self.peer_closed {
                            debug!(id = self.id, pending = self.recv_buf.len(), "Peer closed connection");
                            self.state = ConnectionState::Closed;
                        }
                        break;
                    }
                    Err(err) => {
                        warn!(id = self.id, peer_addr = %self.peer_addr, ?err, "Malformed request");
                        self.state = ConnectionState::Closed;
                    }
                },
                ConnectionState::Writing => match self.flush() {
                    FlushResult::Done => {
                        self.state = if self.keep_alive {
                            ConnectionState::Reading
                        } else {
                            ConnectionState::Closed
                        };
                    }
                    FlushResult::Pending => break,
                    FlushResult::Failed => self.state = ConnectionState::Closed,
                },
                ConnectionState::Dispatching | ConnectionState::Closed => break,
            }
        }

        if self.state != ConnectionState::Closed {
            self.update_interest(ctx.poll_registry);
        }
        self.state
    }
}

// ============================================================================
// Internal Call Handling
// ============================================================================

impl ServerConnection {
    fn dispatch(&mut self, call: RpcCall, ctx: &ConnectionContext<'_>) -> RpcResponse {
        self.keep_alive = call.keep_alive;
        self.calls_served += 1;
        debug!(id = self.id, method = %call.method, params = call.params.len(), "Dispatching call");

        let result = match ctx.methods.find_method(&call.method) {
            Some(handler) => {
                let call_ctx = CallContext {
                    registry: ctx.methods,
                    caller: ctx.caller,
                };
                handler.execute(&call_ctx, &call.params)
            }
            None => Err(CallFault::UnknownMethod(call.method.clone())),
        };

        match result {
            Ok(status) => RpcResponse::Status(status),
            Err(fault) => {
                warn!(id = self.id, method = %call.method, %fault, "Call faulted");
                RpcResponse::Fault {
                    code: fault.code(),
                    message: fault.to_string(),
                }
            }
        }
    }

    fn update_interest(&mut self, registry: &Registry) {
        let interest = match self.state {
            ConnectionState::Writing => Interest::READABLE | Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        if interest == self.interest {
            return;
        }
        match registry.reregister(&mut self.stream, Token(self.id), interest) {
            Ok(()) => self.interest = interest,
            Err(err) => {
                error!(id = self.id, ?err, "Failed to reregister connection");
                self.state = ConnectionState::Closed;
            }
        }
    }
}

// ============================================================================
// Internal Connection I/O
// ============================================================================

impl ServerConnection {
    // Returns false on a read fault.
    fn read_available(&mut self) -> bool {
        let mut recv_pos = self.recv_buf.len();

        loop {
            self.recv_buf.resize(recv_pos + self.max_read_size, 0);
            match self.stream.read(&mut self.recv_buf[recv_pos..]) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(sz) => {
                    trace!(id = self.id, len = sz, "Read data from socket");
                    recv_pos += sz;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if err.kind() == ErrorKind::ConnectionReset {
                        warn!(id = self.id, peer_addr = %self.peer_addr, "Connection reset");
                    } else {
                        error!(id = self.id, peer_addr = %self.peer_addr, ?err, "Error reading from socket");
                    }
                    self.recv_buf.truncate(recv_pos);
                    return false;
                }
            }
        }

        self.recv_buf.truncate(recv_pos);
        true
    }

    fn flush(&mut self) -> FlushResult {
        while self.send_pos < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_pos..]) {
                Ok(0) => {
                    warn!(id = self.id, remaining = self.send_buf.len() - self.send_pos, "Write to socket returned 0");
                    return FlushResult::Failed;
                }
                Ok(sz) => {
                    self.send_pos += sz;
                    trace!(id = self.id, len = sz, remaining = self.send_buf.len() - self.send_pos, "Wrote to socket");
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return FlushResult::Pending,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if err.kind() == ErrorKind::BrokenPipe {
                        warn!(id = self.id, peer_addr = %self.peer_addr, "Broken pipe");
                    } else {
                        error!(id = self.id, peer_addr = %self.peer_addr, ?err, "Error writing to socket");
                    }
                    return FlushResult::Failed;
                }
            }
        }

        self.send_buf.clear();
        self.send_pos = 0;
        FlushResult::Done
    }
}
