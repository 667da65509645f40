//! Connection handling and method dispatch.

mod client_info;
mod connection;
mod dispatcher;
mod registry;

pub use client_info::{AddressFamily, CallerIdentity, ClientInfoTable};
pub use dispatcher::{ConnectionDispatcher, EventMask, ExitHandle, DEFAULT_BACKLOG};
pub use registry::{
    CallContext, DuplicatePolicy, MethodHandler, MethodRegistry, LIST_METHODS, METHOD_HELP,
};
