//! ConnectionDispatcher tests over real sockets.
//!
//! The dispatcher and the client share the test thread: every helper
//! alternates `work()` passes with non-blocking client reads.

mod common;

use common::*;
use rvgate::{
    AddressFamily, CallContext, CallFault, ConnectionDispatcher, Error, FramedCodec,
    MethodHandler, MethodRegistry, RpcCall, RpcResponse, RpcValue, StatusTuple,
    DEFAULT_BACKLOG, FAULT_INVALID_PARAMS, FAULT_UNKNOWN_METHOD,
};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PASS: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(5);

/// Answers with its parameters and the caller's address.
struct Echo;

impl MethodHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn execute(&self, ctx: &CallContext<'_>, params: &[RpcValue]) -> Result<StatusTuple, CallFault> {
        if params.is_empty() {
            return Err(CallFault::Decode(rvgate::DecodeError::Arity {
                method: "echo".to_string(),
                expected: 1,
                got: 0,
            }));
        }
        Ok(StatusTuple::success(
            ctx.caller.address.clone(),
            RpcValue::Array(params.to_vec()),
        ))
    }
}

fn listening_dispatcher() -> (ConnectionDispatcher, u16) {
    init_tracing();
    let mut registry = MethodRegistry::new();
    registry.add_method(Arc::new(Echo)).expect("add failed");
    let mut dispatcher = ConnectionDispatcher::new(registry).expect("Failed to create dispatcher");
    assert!(dispatcher.bind_and_listen(0, DEFAULT_BACKLOG));
    let port = dispatcher.port().expect("no port after listen");
    (dispatcher, port)
}

fn connect(dispatcher: &mut ConnectionDispatcher, port: u16) -> TcpStream {
    let before = dispatcher.connection_count();
    let client = TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect");
    client.set_nonblocking(true).expect("set_nonblocking failed");

    let start = Instant::now();
    while dispatcher.connection_count() == before {
        assert!(start.elapsed() < DEADLINE, "connection was never accepted");
        dispatcher.work(PASS).expect("work failed");
    }
    client
}

fn send(client: &mut TcpStream, call: &RpcCall) {
    let bytes = FramedCodec::default()
        .encode_call(call)
        .expect("encode failed");
    client.write_all(&bytes).expect("write failed");
}

/// Pumps the dispatcher until `count` responses arrived on `client`.
fn receive(dispatcher: &mut ConnectionDispatcher, client: &mut TcpStream, count: usize) -> Vec<RpcResponse> {
    let codec = FramedCodec::default();
    let mut buf = Vec::new();
    let mut responses = Vec::new();
    let start = Instant::now();

    while responses.len() < count {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for responses");
        dispatcher.work(PASS).expect("work failed");

        let mut chunk = [0u8; 4096];
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => panic!("read failed: {err}"),
        }
        while let Some((response, used)) = codec.decode_response(&buf).expect("bad frame") {
            buf.drain(..used);
            responses.push(response);
        }
    }
    responses
}

/// Pumps the dispatcher until the server closes `client`.
fn wait_closed(dispatcher: &mut ConnectionDispatcher, client: &mut TcpStream) {
    let start = Instant::now();
    loop {
        assert!(start.elapsed() < DEADLINE, "server never closed the connection");
        dispatcher.work(PASS).expect("work failed");
        let mut chunk = [0u8; 64];
        match client.read(&mut chunk) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(_) => return,
        }
    }
}

// ============================================================================
// Listening
// ============================================================================

#[test]
fn ephemeral_port_is_reported() {
    let (dispatcher, port) = listening_dispatcher();

    assert!(port > 0);
    assert!(dispatcher.is_listening());
    assert_eq!(dispatcher.local_addr().map(|addr| addr.port()), Some(port));
}

#[test]
fn second_bind_is_rejected() {
    let (mut dispatcher, port) = listening_dispatcher();

    let err = dispatcher
        .try_bind_and_listen(0, DEFAULT_BACKLOG)
        .expect_err("second bind must fail");
    assert!(matches!(err, Error::AlreadyListening(addr) if addr.port() == port));
    assert!(!dispatcher.bind_and_listen(0, DEFAULT_BACKLOG));
    assert_eq!(dispatcher.port(), Some(port));
}

#[test]
fn work_without_listener_fails() {
    init_tracing();
    let mut dispatcher =
        ConnectionDispatcher::new(MethodRegistry::new()).expect("Failed to create dispatcher");

    assert!(matches!(dispatcher.work(PASS), Err(Error::NotListening)));
    assert!(matches!(dispatcher.accept_connection(), Err(Error::NotListening)));
}

#[test]
fn shutdown_is_idempotent() {
    let (mut dispatcher, _) = listening_dispatcher();

    dispatcher.shutdown();
    dispatcher.shutdown();

    assert!(!dispatcher.is_listening());
    assert_eq!(dispatcher.port(), None);
    assert_eq!(dispatcher.connection_count(), 0);
    // The port can be bound again after shutdown.
    assert!(dispatcher.bind_and_listen(0, DEFAULT_BACKLOG));
}

#[test]
fn shutdown_closes_every_client() {
    let (mut dispatcher, port) = listening_dispatcher();
    let clients = [
        connect(&mut dispatcher, port),
        connect(&mut dispatcher, port),
    ];
    let ids = dispatcher.connection_ids();
    assert_eq!(ids.len(), 2);

    dispatcher.shutdown();

    for mut client in clients {
        client.set_nonblocking(false).expect("set_nonblocking failed");
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set_read_timeout failed");
        let mut chunk = [0u8; 16];
        match client.read(&mut chunk) {
            Ok(n) => assert_eq!(n, 0, "expected end of stream"),
            Err(err) => assert!(
                !matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
                "client was left open: {err}"
            ),
        }
    }
    for id in ids {
        assert!(dispatcher.client_info(id).is_none());
    }
    assert_eq!(dispatcher.connection_count(), 0);
    assert!(!dispatcher.is_listening());
}

// ============================================================================
// Serving Calls
// ============================================================================

#[test]
fn keep_alive_serves_calls_in_order() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut client = connect(&mut dispatcher, port);

    send(&mut client, &RpcCall::new("echo", vec![RpcValue::Int(1)]));
    send(&mut client, &RpcCall::new("echo", vec![RpcValue::Int(2)]));
    let responses = receive(&mut dispatcher, &mut client, 2);

    assert_eq!(
        responses,
        vec![
            RpcResponse::Status(StatusTuple::success(
                "127.0.0.1",
                RpcValue::Array(vec![RpcValue::Int(1)])
            )),
            RpcResponse::Status(StatusTuple::success(
                "127.0.0.1",
                RpcValue::Array(vec![RpcValue::Int(2)])
            )),
        ]
    );
    assert_eq!(dispatcher.connection_count(), 1);
}

#[test]
fn caller_identity_is_recorded_per_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let client = connect(&mut dispatcher, port);

    let ids = dispatcher.connection_ids();
    assert_eq!(ids.len(), 1);
    let identity = dispatcher.client_info(ids[0]).expect("no caller identity");
    let local = client.local_addr().expect("local_addr failed");

    assert_eq!(identity.address, "127.0.0.1");
    assert_eq!(identity.port, local.port());
    assert_eq!(identity.family, AddressFamily::IPv4);
}

#[test]
fn faults_keep_the_connection_open() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut client = connect(&mut dispatcher, port);

    send(&mut client, &RpcCall::new("noSuchMethod", vec![]));
    send(&mut client, &RpcCall::new("echo", vec![]));
    send(&mut client, &RpcCall::new("echo", vec![RpcValue::Bool(true)]));
    let responses = receive(&mut dispatcher, &mut client, 3);

    assert!(matches!(
        &responses[0],
        RpcResponse::Fault { code, .. } if *code == FAULT_UNKNOWN_METHOD
    ));
    assert!(matches!(
        &responses[1],
        RpcResponse::Fault { code, .. } if *code == FAULT_INVALID_PARAMS
    ));
    assert!(matches!(&responses[2], RpcResponse::Status(status) if status.code == 1));
    assert_eq!(dispatcher.connection_count(), 1);
}

#[test]
fn closing_call_ends_the_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut client = connect(&mut dispatcher, port);

    send(&mut client, &RpcCall::new("echo", vec![RpcValue::Int(7)]).closing());
    let responses = receive(&mut dispatcher, &mut client, 1);
    assert!(matches!(&responses[0], RpcResponse::Status(_)));

    wait_closed(&mut dispatcher, &mut client);
    assert_eq!(dispatcher.connection_count(), 0);
    assert!(dispatcher.connection_ids().is_empty());
}

#[test]
fn garbage_closes_only_that_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut good = connect(&mut dispatcher, port);
    let mut bad = connect(&mut dispatcher, port);
    assert_eq!(dispatcher.connection_count(), 2);

    bad.write_all(b"GET / HTTP/1.1\r\n\r\n").expect("write failed");
    wait_closed(&mut dispatcher, &mut bad);
    assert_eq!(dispatcher.connection_count(), 1);

    send(&mut good, &RpcCall::new("echo", vec![RpcValue::Int(3)]));
    let responses = receive(&mut dispatcher, &mut good, 1);
    assert!(matches!(&responses[0], RpcResponse::Status(_)));
}

#[test]
fn huge_length_claim_closes_only_that_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut good = connect(&mut dispatcher, port);
    let mut bad = connect(&mut dispatcher, port);

    bad.write_all(&raw_frame(&huge_params_body())).expect("write failed");
    wait_closed(&mut dispatcher, &mut bad);
    assert_eq!(dispatcher.connection_count(), 1);
    assert!(dispatcher.is_listening());

    send(&mut good, &RpcCall::new("echo", vec![RpcValue::Int(4)]));
    let responses = receive(&mut dispatcher, &mut good, 1);
    assert!(matches!(&responses[0], RpcResponse::Status(_)));
}

#[test]
fn deeply_nested_params_close_only_that_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let mut good = connect(&mut dispatcher, port);
    let mut bad = connect(&mut dispatcher, port);

    // Nonblocking client: push the frame through between dispatcher passes.
    let frame = raw_frame(&nested_params_body(100_000));
    let mut written = 0;
    let start = Instant::now();
    while written < frame.len() {
        assert!(start.elapsed() < DEADLINE, "frame was never sent");
        match bad.write(&frame[written..]) {
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(_) => break,
        }
        dispatcher.work(PASS).expect("work failed");
    }
    wait_closed(&mut dispatcher, &mut bad);
    assert_eq!(dispatcher.connection_count(), 1);

    send(&mut good, &RpcCall::new("echo", vec![RpcValue::Int(5)]));
    let responses = receive(&mut dispatcher, &mut good, 1);
    assert!(matches!(&responses[0], RpcResponse::Status(_)));
}

#[test]
fn peer_disconnect_releases_connection() {
    let (mut dispatcher, port) = listening_dispatcher();
    let client = connect(&mut dispatcher, port);
    let id = dispatcher.connection_ids()[0];

    drop(client);

    let start = Instant::now();
    while dispatcher.connection_count() > 0 {
        assert!(start.elapsed() < DEADLINE, "disconnect was never noticed");
        dispatcher.work(PASS).expect("work failed");
    }
    assert!(dispatcher.client_info(id).is_none());
}

#[test]
fn connection_ids_are_unique() {
    let (mut dispatcher, port) = listening_dispatcher();
    let _first = connect(&mut dispatcher, port);
    let _second = connect(&mut dispatcher, port);

    let mut ids = dispatcher.connection_ids();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| *id >= 1000));
}

// ============================================================================
// Exit
// ============================================================================

#[test]
fn exit_handle_interrupts_work() {
    let (mut dispatcher, _) = listening_dispatcher();
    let handle = dispatcher.exit_handle();

    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.exit();
    });

    let start = Instant::now();
    dispatcher.work(Duration::from_secs(30)).expect("work failed");
    assert!(start.elapsed() < Duration::from_secs(10));
    waker.join().expect("waker thread panicked");

    // The request is consumed; the next pass polls normally.
    dispatcher.work(PASS).expect("work failed");
}

#[test]
fn exit_before_work_returns_immediately() {
    let (mut dispatcher, _) = listening_dispatcher();

    dispatcher.exit();
    let start = Instant::now();
    dispatcher.work(Duration::from_secs(30)).expect("work failed");
    assert!(start.elapsed() < Duration::from_secs(10));
}
