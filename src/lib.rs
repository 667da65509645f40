//! rvgate - An access-control gateway in front of a ROS master
//!
//! rvgate exposes the master's RPC surface to client nodes, asks an access
//! policy about every call, forwards approved calls to the real master and
//! rewrites a few of them on the way (monitored topic redirection, subgraph
//! filtering, upward parameter search).
//!
//! Connections are served by a single-threaded mio readiness loop
//! ([`ConnectionDispatcher`]); calls are routed by name through a
//! [`MethodRegistry`] to the [`Gateway`] handlers.

// Internal-only modules
pub(crate) mod codec;
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod gateway;
pub(crate) mod server;
pub(crate) mod value;

// These are the intended public API
pub use codec::{FramedCodec, RpcCall, RpcResponse, WireCodec, DEFAULT_MAX_FRAME_SIZE};
pub use crate::config::{GatewaySettings, MasterAddress, MASTER_URI_ENV};
pub use error::{
    CallFault, DecodeError, Error, UpstreamError, FAULT_INVALID_PARAMS, FAULT_UNKNOWN_METHOD,
    FAULT_UPSTREAM,
};
pub use gateway::{
    collapse_separators, filter_topic_pairs, monitored_alias, resolve_subgraph, upward_keys,
    Access, AccessPolicy, AllowAll, Gateway, GatewayCell, GatewayMethod, GatewayOptions,
    MonitorSet, MonitoredTopics, Operation, Request, StaticPolicy, TcpUpstream, Upstream,
};
pub use server::{
    AddressFamily, CallContext, CallerIdentity, ClientInfoTable, ConnectionDispatcher,
    DuplicatePolicy, EventMask, ExitHandle, MethodHandler, MethodRegistry, DEFAULT_BACKLOG,
    LIST_METHODS, METHOD_HELP,
};
pub use value::{RpcValue, StatusTuple};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::codec::{FramedCodec, RpcCall, RpcResponse, WireCodec};
    pub use crate::config::{GatewaySettings, MasterAddress};
    pub use crate::error::{CallFault, DecodeError, Error, UpstreamError};
    pub use crate::gateway::{
        AccessPolicy, AllowAll, Gateway, GatewayCell, GatewayOptions, MonitorSet,
        MonitoredTopics, Operation, StaticPolicy, TcpUpstream, Upstream,
    };
    pub use crate::server::{
        CallContext, CallerIdentity, ConnectionDispatcher, ExitHandle, MethodHandler,
        MethodRegistry,
    };
    pub use crate::value::{RpcValue, StatusTuple};
}
