//! Shared fixtures for the integration tests.
//!
//! # Running with tracing
//!
//! ```bash
//! TEST_LOG=2 cargo test gateway -- --nocapture
//! ```

#![allow(dead_code)]

use rvgate::{
    AccessPolicy, AddressFamily, AllowAll, CallerIdentity, Gateway, GatewayOptions,
    MonitoredTopics, Operation, RpcValue, StatusTuple, Upstream, UpstreamError,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing based on TEST_LOG environment variable
///
/// Verbosity levels (like -v, -vv, -vvv):
/// - TEST_LOG=1: Info level
/// - TEST_LOG=2: Debug level
/// - TEST_LOG=3: Trace level
pub fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace", // 3 or more
                };

                let filter = format!("rvgate={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Values
// ============================================================================

pub fn s(value: &str) -> RpcValue {
    RpcValue::String(value.to_string())
}

pub fn pair(topic: &str, datatype: &str) -> RpcValue {
    RpcValue::Array(vec![s(topic), s(datatype)])
}

pub fn caller() -> CallerIdentity {
    CallerIdentity {
        address: "127.0.0.1".to_string(),
        port: 40000,
        family: AddressFamily::IPv4,
    }
}

/// Well-formed parameters for every operation.
pub fn sample_params(op: Operation) -> Vec<RpcValue> {
    let caller_id = s("/ns/node");
    match op {
        Operation::GetUri
        | Operation::GetPid
        | Operation::GetTopicTypes
        | Operation::GetSystemState
        | Operation::GetRvState
        | Operation::GetParamNames => vec![caller_id],
        Operation::RegisterPublisher | Operation::RegisterSubscriber => vec![
            caller_id,
            s("/chatter"),
            s("std_msgs/String"),
            s("http://node:4000/"),
        ],
        Operation::UnregisterPublisher | Operation::UnregisterSubscriber => {
            vec![caller_id, s("/chatter"), s("http://node:4000/")]
        }
        Operation::RegisterService => vec![
            caller_id,
            s("/add_two_ints"),
            s("rosrpc://node:5000"),
            s("http://node:4000/"),
        ],
        Operation::UnregisterService => {
            vec![caller_id, s("/add_two_ints"), s("rosrpc://node:5000")]
        }
        Operation::LookupService => vec![caller_id, s("/add_two_ints")],
        Operation::LookupNode => vec![caller_id, s("/talker")],
        Operation::GetPublishedTopics => vec![caller_id, s("")],
        Operation::GetParam
        | Operation::HasParam
        | Operation::DeleteParam
        | Operation::SearchParam => vec![caller_id, s("rate")],
        Operation::SetParam => vec![caller_id, s("/rate"), RpcValue::Int(10)],
        Operation::SubscribeParam | Operation::UnsubscribeParam => {
            vec![caller_id, s("http://node:4000/"), s("/rate")]
        }
        Operation::PublisherUpdate => vec![
            caller_id,
            s("/chatter"),
            RpcValue::Array(vec![s("http://talker:4001/")]),
        ],
    }
}

// ============================================================================
// Recording Upstream
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedCall {
    pub method: String,
    pub params: Vec<RpcValue>,
}

type Responder = dyn Fn(&str, &[RpcValue]) -> Result<StatusTuple, UpstreamError> + Send + Sync;

/// Upstream that records every call and answers through a closure.
pub struct RecordingUpstream {
    calls: Arc<Mutex<Vec<ForwardedCall>>>,
    responder: Box<Responder>,
}

/// Read side of a [`RecordingUpstream`] kept by the test.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ForwardedCall>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<ForwardedCall> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.method).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }
}

impl RecordingUpstream {
    pub fn new<F>(responder: F) -> (Self, CallLog)
    where
        F: Fn(&str, &[RpcValue]) -> Result<StatusTuple, UpstreamError> + Send + Sync + 'static,
    {
        let log = CallLog::default();
        let upstream = Self {
            calls: log.calls.clone(),
            responder: Box::new(responder),
        };
        (upstream, log)
    }

    /// Answers every call with `[1, "ok", 1]`.
    pub fn ok() -> (Self, CallLog) {
        Self::new(|_, _| Ok(StatusTuple::success("ok", 1)))
    }
}

impl Upstream for RecordingUpstream {
    fn execute(&self, method: &str, params: &[RpcValue]) -> Result<StatusTuple, UpstreamError> {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push(ForwardedCall {
                method: method.to_string(),
                params: params.to_vec(),
            });
        (self.responder)(method, params)
    }
}

// ============================================================================
// Policies and Monitored Topics
// ============================================================================

/// Refuses everything.
pub struct DenyAll;

impl AccessPolicy for DenyAll {
    fn is_command_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        false
    }

    fn is_publisher_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        false
    }

    fn is_subscriber_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        false
    }
}

/// A monitored set that never changes.
pub struct FixedTopics(pub HashSet<String>);

impl FixedTopics {
    pub fn of(topics: &[&str]) -> Self {
        Self(topics.iter().map(|topic| topic.to_string()).collect())
    }
}

impl MonitoredTopics for FixedTopics {
    fn is_monitored(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }
}

// ============================================================================
// Gateway Construction
// ============================================================================

pub fn options() -> GatewayOptions {
    GatewayOptions {
        upstream_port: 11312,
        gateway_port: 11311,
        ..GatewayOptions::default()
    }
}

pub fn gateway(
    upstream: RecordingUpstream,
    policy: impl AccessPolicy + 'static,
    monitored: &[&str],
) -> Gateway {
    init_tracing();
    Gateway::new(
        Box::new(upstream),
        Box::new(policy),
        Arc::new(FixedTopics::of(monitored)),
        options(),
    )
}

pub fn open_gateway(upstream: RecordingUpstream) -> Gateway {
    gateway(upstream, AllowAll, &[])
}

// ============================================================================
// Raw Frames
// ============================================================================

/// Wraps `body` in a frame header with a matching size field.
pub fn raw_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = b"rvg!".to_vec();
    frame.extend_from_slice(&[0, 1]);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Method "x" whose params list claims 2^61 entries.
pub fn huge_params_body() -> Vec<u8> {
    let mut body = vec![1, b'x', 0xFD];
    body.extend_from_slice(&(1u64 << 61).to_le_bytes());
    body
}

/// Method "x" with one param made of `depth` nested single-item arrays.
pub fn nested_params_body(depth: usize) -> Vec<u8> {
    let mut body = vec![1, b'x', 1];
    for _ in 0..depth {
        body.extend_from_slice(&[6, 1]);
    }
    body.extend_from_slice(&[0, 0]);
    body
}
