//! Single-threaded readiness loop owning the listening socket and every
//! client connection.
//!
//! One call is dispatched to completion, upstream round trip included,
//! before the next ready socket is serviced.

use super::client_info::{CallerIdentity, ClientInfoTable};
use super::connection::{ConnectionContext, ConnectionState, ServerConnection};
use super::registry::MethodRegistry;
use crate::codec::{FramedCodec, WireCodec};
use crate::config::GatewaySettings;
use crate::error::Error;

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

// Internal constants for connection management
const LISTENER: Token = Token(0);
const WAKE: Token = Token(1);
const CONNECTION_ID_RANGE_START: usize = 1000;

pub const DEFAULT_BACKLOG: i32 = 5;
const DEFAULT_POLL_CAPACITY: usize = 128;
const DEFAULT_MAX_READ_SIZE: usize = 64 * 1024;

// ============================================================================
// EventMask
// ============================================================================

/// Readiness bits for an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const READABLE: EventMask = EventMask(0b001);
    pub const WRITABLE: EventMask = EventMask(0b010);
    pub const ERROR: EventMask = EventMask(0b100);

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl From<&Event> for EventMask {
    fn from(event: &Event) -> Self {
        let mut mask = EventMask::NONE;
        if event.is_readable() || event.is_read_closed() {
            mask = mask | EventMask::READABLE;
        }
        if event.is_writable() || event.is_write_closed() {
            mask = mask | EventMask::WRITABLE;
        }
        if event.is_error() {
            mask = mask | EventMask::ERROR;
        }
        mask
    }
}

// ============================================================================
// ExitHandle
// ============================================================================

/// Thread-safe handle for stopping [`ConnectionDispatcher::work`].
///
/// Obtain one from [`ConnectionDispatcher::exit_handle`]. Cancellation is
/// cooperative: a call already being dispatched runs to completion.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    exit: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ExitHandle {
    /// Makes the current or next `work()` call return promptly.
    pub fn exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!(?err, "Failed to wake dispatcher");
        }
    }
}

// ============================================================================
// ConnectionDispatcher
// ============================================================================

/// Accepts client connections and serves their calls from one thread.
///
/// Not thread-safe apart from [`ExitHandle`]. The caller owns the run loop
/// and calls [`Self::work`] repeatedly.
pub struct ConnectionDispatcher {
    poll: Poll,
    poll_capacity: usize,
    waker: Arc<Waker>,
    exit: Arc<AtomicBool>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    connections: HashMap<usize, ServerConnection>,
    clients: ClientInfoTable,
    methods: MethodRegistry,
    codec: Arc<dyn WireCodec>,
    next_id: usize,
    max_read_size: usize,
    accept_pending: bool,
}

impl std::fmt::Debug for ConnectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDispatcher")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .field("methods", &self.methods)
            .field("next_id", &self.next_id)
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionDispatcher {
    /// Creates a dispatcher using [`FramedCodec`] and default limits.
    pub fn new(methods: MethodRegistry) -> Result<Self, Error> {
        Self::with_codec(
            methods,
            Arc::new(FramedCodec::default()),
            DEFAULT_POLL_CAPACITY,
            DEFAULT_MAX_READ_SIZE,
        )
    }

    /// Creates a dispatcher sized from gateway settings.
    pub fn from_settings(settings: &GatewaySettings, methods: MethodRegistry) -> Result<Self, Error> {
        Self::with_codec(
            methods,
            Arc::new(FramedCodec::new(settings.max_frame_size)),
            settings.poll_capacity,
            settings.max_read_size,
        )
    }

    pub fn with_codec(
        methods: MethodRegistry,
        codec: Arc<dyn WireCodec>,
        poll_capacity: usize,
        max_read_size: usize,
    ) -> Result<Self, Error> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);

        Ok(Self {
            poll,
            poll_capacity: poll_capacity.max(1),
            waker,
            exit: Arc::new(AtomicBool::new(false)),
            listener: None,
            local_addr: None,
            connections: HashMap::new(),
            clients: ClientInfoTable::new(),
            methods,
            codec,
            next_id: CONNECTION_ID_RANGE_START,
            max_read_size: max_read_size.max(1),
            accept_pending: false,
        })
    }
}

// ============================================================================
// Listening
// ============================================================================

impl ConnectionDispatcher {
    /// Binds all interfaces on `port` and starts listening.
    ///
    /// `port` 0 asks the OS for an ephemeral port; see [`Self::port`]. Returns
    /// false on failure, in which case nothing is left listening.
    pub fn bind_and_listen(&mut self, port: u16, backlog: i32) -> bool {
        match self.try_bind_and_listen(port, backlog) {
            Ok(_) => true,
            Err(err) => {
                error!(port, ?err, "Could not bind and listen");
                false
            }
        }
    }

    /// Like [`Self::bind_and_listen`] but returns the bound address or the
    /// underlying error.
    #[instrument(skip(self))]
    pub fn try_bind_and_listen(&mut self, port: u16, backlog: i32) -> Result<SocketAddr, Error> {
        if let Some(local_addr) = self.local_addr {
            return Err(Error::AlreadyListening(local_addr));
        }

        let requested_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&requested_addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;

        let mut listener = TcpListener::from_std(socket.into());
        let local_addr = listener.local_addr()?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!(%local_addr, backlog, "Listening for connections");
        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// The bound port, once listening.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl ConnectionDispatcher {
    /// Runs one bounded pass of the readiness loop.
    ///
    /// Waits up to `timeout` for any socket to become ready and services
    /// every ready socket once. Returns early after [`Self::exit`].
    #[instrument(skip(self))]
    pub fn work(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.listener.is_none() && self.connections.is_empty() {
            return Err(Error::NotListening);
        }
        if self.exit.swap(false, Ordering::SeqCst) {
            debug!("Exit requested before polling");
            return Ok(());
        }

        let mut events = Events::with_capacity(self.poll_capacity);
        match self.poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(Error::PollError(err.to_string())),
        }

        for event in events.iter() {
            match event.token() {
                WAKE => trace!("Woken"),
                LISTENER => {
                    let keep = self.handle_event(EventMask::from(event));
                    if keep.is_empty() {
                        self.close_listener();
                    }
                }
                Token(id) => self.service_connection(id, EventMask::from(event)),
            }
        }

        // Edge-triggered: a backlog left behind by fd exhaustion raises no
        // new event, so it is retried on every pass until drained.
        if self.accept_pending && self.listener.is_some() {
            self.accept_pending = false;
            if self.handle_event(EventMask::READABLE).is_empty() {
                self.close_listener();
            }
        }

        if self.exit.swap(false, Ordering::SeqCst) {
            debug!("Exit requested");
        }
        Ok(())
    }

    /// Requests that the current or next `work()` call return promptly.
    pub fn exit(&self) {
        self.exit_handle().exit();
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            exit: self.exit.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Handles readiness of the listening socket.
    ///
    /// Accepts every pending connection on a readable event. Returns the
    /// events to keep watching, [`EventMask::NONE`] once the listener failed.
    ///
    /// Running out of descriptors or buffers is not a listener failure: the
    /// backlog stays queued and is retried on the next `work()` pass.
    pub fn handle_event(&mut self, mask: EventMask) -> EventMask {
        if !mask.is_readable() {
            if mask.is_error() {
                warn!("Error event on listening socket");
            }
            return EventMask::READABLE;
        }

        loop {
            match self.accept_connection() {
                Ok(Some(_)) => continue,
                Ok(None) => return EventMask::READABLE,
                Err(Error::Io(err)) if is_resource_exhaustion(&err) => {
                    warn!(?err, "Out of resources accepting connection, will retry");
                    self.accept_pending = true;
                    return EventMask::READABLE;
                }
                Err(err) => {
                    error!(?err, "Error accepting connection");
                    return EventMask::NONE;
                }
            }
        }
    }

    /// Accepts one pending connection.
    ///
    /// Returns its id, or `None` when nothing is pending. A socket that
    /// cannot be set up is dropped and the next pending one is tried.
    #[instrument(skip(self))]
    pub fn accept_connection(&mut self) -> Result<Option<usize>, Error> {
        loop {
            let listener = self.listener.as_ref().ok_or(Error::NotListening)?;
            let (stream, peer_addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_transient_accept_error(&err) => {
                    warn!(?err, "Transient accept error");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if let Err(err) = stream.set_nodelay(true) {
                warn!(%peer_addr, ?err, "Dropping connection, failed to set TCP_NODELAY");
                continue;
            }

            let id = self.next_id;
            let mut connection = ServerConnection::new(id, stream, peer_addr, self.max_read_size);
            if let Err(err) = connection.register(self.poll.registry()) {
                warn!(id, %peer_addr, ?err, "Dropping connection, failed to register");
                continue;
            }
            self.advance_connection_id();
            self.clients.insert(id, CallerIdentity::from(peer_addr));
            self.connections.insert(id, connection);

            info!(id, %peer_addr, "Accepted connection");
            return Ok(Some(id));
        }
    }

    /// Unregisters and releases a connection and its caller identity.
    #[instrument(skip(self))]
    pub fn remove_connection(&mut self, id: usize) {
        match self.connections.remove(&id) {
            Some(mut connection) => connection.close(self.poll.registry()),
            None => warn!(id, "Connection not found when removing connection"),
        }
        self.clients.remove(id);
    }

    /// Closes every connection and the listening socket. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.close(self.poll.registry());
        }
        self.clients.clear();
        self.close_listener();
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ConnectionDispatcher {
    pub fn registry(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn registry_mut(&mut self) -> &mut MethodRegistry {
        &mut self.methods
    }

    /// Caller identity of an open connection.
    pub fn client_info(&self, id: usize) -> Option<&CallerIdentity> {
        self.clients.find(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<usize> {
        self.connections.keys().copied().collect()
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

impl ConnectionDispatcher {
    fn service_connection(&mut self, id: usize, mask: EventMask) {
        let Some(connection) = self.connections.get_mut(&id) else {
            trace!(id, "Event for removed connection");
            return;
        };
        let Some(caller) = self.clients.find(id) else {
            error!(id, "Connection has no caller identity");
            self.remove_connection(id);
            return;
        };

        let ctx = ConnectionContext {
            methods: &self.methods,
            caller,
            codec: self.codec.as_ref(),
            poll_registry: self.poll.registry(),
        };
        let readable = mask.is_readable() || mask.is_error();
        if connection.handle_event(readable, &ctx) == ConnectionState::Closed {
            self.remove_connection(id);
        }
    }

    fn close_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(err) = self.poll.registry().deregister(&mut listener) {
                warn!(?err, "Failed to deregister listener");
            }
            info!(local_addr = ?self.local_addr, "Closed listener");
        }
        self.local_addr = None;
    }

    fn advance_connection_id(&mut self) {
        loop {
            self.next_id = self
                .next_id
                .checked_add(1)
                .unwrap_or(CONNECTION_ID_RANGE_START);
            if !self.connections.contains_key(&self.next_id) {
                break;
            }
        }
    }
}

// The peer gave up or the network blipped before accept() returned.
fn is_transient_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    ) {
        return true;
    }
    matches!(
        err.raw_os_error(),
        Some(
            libc::EPROTO
                | libc::ENETDOWN
                | libc::ENETUNREACH
                | libc::ENOPROTOOPT
                | libc::EHOSTDOWN
                | libc::EHOSTUNREACH
                | libc::EOPNOTSUPP
        )
    )
}

fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

impl Drop for ConnectionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
