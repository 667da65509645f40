//! The handler layer: authorize, forward, transform.
//!
//! Every call runs the same pipeline. Parameters are decoded into a typed
//! [`Request`], the [`AccessPolicy`] is asked, a denial short-circuits with
//! `[0, "Access Control", 0]`, and an approved call is forwarded to the
//! [`Upstream`] with the per-call transforms applied on the way.

mod monitor;
mod names;
mod operation;
mod policy;
mod request;
mod upstream;

pub use monitor::{monitored_alias, MonitorSet, MonitoredTopics};
pub use names::{collapse_separators, filter_topic_pairs, resolve_subgraph, upward_keys};
pub use operation::{Access, Operation};
pub use policy::{AccessPolicy, AllowAll, StaticPolicy};
pub use request::Request;
pub use upstream::{TcpUpstream, Upstream};

use crate::config::GatewaySettings;
use crate::error::{CallFault, Error};
use crate::server::{CallContext, CallerIdentity, MethodHandler, MethodRegistry};
use crate::value::{RpcValue, StatusTuple};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

const DEFAULT_MONITOR_NODE: &str = "/rvmonitor";
const DEFAULT_MONITOR_PREFIX: &str = "/rv/monitored";

// ============================================================================
// GatewayOptions
// ============================================================================

/// Process-local values the handlers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Caller id whose publisher registrations are never redirected.
    pub monitor_node: String,
    /// Prepended to a monitored topic to form its alias.
    pub monitor_prefix: String,
    /// Port of the upstream registry, reported by `getRVState`.
    pub upstream_port: u16,
    /// Port clients reach the gateway on, reported by `getRVState`.
    pub gateway_port: u16,
}

impl GatewayOptions {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            monitor_node: settings.monitor_node.clone(),
            monitor_prefix: settings.monitor_prefix.clone(),
            upstream_port: settings.upstream.port,
            gateway_port: settings.master.port,
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            monitor_node: DEFAULT_MONITOR_NODE.to_string(),
            monitor_prefix: DEFAULT_MONITOR_PREFIX.to_string(),
            upstream_port: 0,
            gateway_port: 0,
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Serves every [`Operation`] on behalf of connected callers.
pub struct Gateway {
    upstream: Box<dyn Upstream>,
    policy: Box<dyn AccessPolicy>,
    monitor: Arc<dyn MonitoredTopics>,
    options: GatewayOptions,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        upstream: Box<dyn Upstream>,
        policy: Box<dyn AccessPolicy>,
        monitor: Arc<dyn MonitoredTopics>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            upstream,
            policy,
            monitor,
            options,
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Registers one handler per operation.
    pub fn register_all(self: &Arc<Self>, registry: &mut MethodRegistry) -> Result<(), Error> {
        for op in Operation::ALL {
            registry.add_method(Arc::new(GatewayMethod::new(op, self.clone())))?;
        }
        info!(count = Operation::ALL.len(), "Registered gateway methods");
        Ok(())
    }

    /// Runs the full pipeline for one call.
    #[instrument(skip(self, op, params, caller), fields(method = %op, address = %caller.address))]
    pub fn handle(
        &self,
        op: Operation,
        params: &[RpcValue],
        caller: &CallerIdentity,
    ) -> Result<StatusTuple, CallFault> {
        let request = Request::decode(op, params)?;

        // The search walks the collapsed name, so the policy sees that too.
        let caller_id = match op {
            Operation::SearchParam => collapse_separators(request.caller_id()),
            _ => request.caller_id().to_string(),
        };
        let subject = request.subject().unwrap_or_default().to_string();
        info!(%caller_id, %subject, "Node trying to {op}");

        if !self.is_allowed(op, &caller_id, request.topic(), caller) {
            warn!(%caller_id, %subject, "Node is not able to {op} due to access control");
            return Ok(StatusTuple::access_denied());
        }

        let status = match (op, request) {
            (op, _) if op.is_local() => self.rv_state(),
            (Operation::GetPublishedTopics, Request::Subgraph { caller_id, subgraph }) => {
                self.published_topics(&caller_id, &subgraph)?
            }
            (
                Operation::RegisterPublisher,
                Request::TopicRegistration {
                    caller_id,
                    topic,
                    datatype,
                    caller_uri,
                },
            ) => {
                let topic = self.publish_target(&caller_id, topic);
                let request = Request::TopicRegistration {
                    caller_id,
                    topic,
                    datatype,
                    caller_uri,
                };
                self.forward(op, &request.to_params())?
            }
            (Operation::SearchParam, Request::ParamKey { caller_id: raw_caller_id, key }) => {
                self.search_param(&raw_caller_id, &caller_id, &key)?
            }
            (op, request) => self.forward(op, &request.to_params())?,
        };

        info!(%caller_id, %subject, code = status.code, "Node completed {op}");
        Ok(status)
    }

    fn is_allowed(
        &self,
        op: Operation,
        caller_id: &str,
        topic: Option<&str>,
        caller: &CallerIdentity,
    ) -> bool {
        match (op.access(), topic) {
            (Access::Publisher, Some(topic)) => {
                self.policy.is_publisher_allowed(topic, caller_id, caller)
            }
            (Access::Subscriber, Some(topic)) => {
                self.policy.is_subscriber_allowed(topic, caller_id, caller)
            }
            _ => self.policy.is_command_allowed(op.command(), caller_id, caller),
        }
    }

    fn forward(&self, op: Operation, params: &[RpcValue]) -> Result<StatusTuple, CallFault> {
        Ok(self.upstream.execute(op.name(), params)?)
    }
}

// ============================================================================
// Transforms
// ============================================================================

impl Gateway {
    /// Always fetches the full topic list, then filters by the resolved
    /// subgraph.
    fn published_topics(&self, caller_id: &str, subgraph: &str) -> Result<StatusTuple, CallFault> {
        let resolved = resolve_subgraph(caller_id, subgraph);
        let unfiltered = Request::Subgraph {
            caller_id: caller_id.to_string(),
            subgraph: "/".to_string(),
        };
        let mut status = self.forward(Operation::GetPublishedTopics, &unfiltered.to_params())?;

        if !resolved.is_empty() {
            if let RpcValue::Array(pairs) = &status.value {
                let kept = filter_topic_pairs(pairs, &resolved);
                debug!(subgraph = %resolved, total = pairs.len(), kept = kept.len(), "Filtered published topics");
                status.value = RpcValue::Array(kept);
            }
        }
        Ok(status)
    }

    /// Topic a publisher registration is forwarded under.
    fn publish_target(&self, caller_id: &str, topic: String) -> String {
        if caller_id == self.options.monitor_node || !self.monitor.is_monitored(&topic) {
            return topic;
        }
        let alias = monitored_alias(&self.options.monitor_prefix, &topic);
        info!(%topic, %alias, "Topic is monitored, registering alias instead");
        alias
    }

    /// Upward search built from `hasParam` lookups.
    fn search_param(
        &self,
        caller_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<StatusTuple, CallFault> {
        for candidate in upward_keys(namespace, key) {
            debug!(key = %candidate, "Looking up hasParam");
            let lookup = Request::ParamKey {
                caller_id: caller_id.to_string(),
                key: candidate.clone(),
            };
            let status = self.forward(Operation::HasParam, &lookup.to_params())?;
            if status.value == RpcValue::Bool(true) {
                return Ok(StatusTuple::success(format!("Found [{candidate}]"), candidate));
            }
        }

        Ok(StatusTuple::new(
            StatusTuple::NOT_FOUND,
            format!("Cannot find parameter [{key}] in an upwards search"),
            "",
        ))
    }

    fn rv_state(&self) -> StatusTuple {
        StatusTuple::success(
            "RV State",
            vec![
                RpcValue::Int(i32::from(self.options.upstream_port)),
                RpcValue::Int(i32::from(self.options.gateway_port)),
                RpcValue::Array(Vec::new()),
            ],
        )
    }
}

// ============================================================================
// GatewayMethod
// ============================================================================

/// Binds one [`Operation`] of a shared [`Gateway`] into a [`MethodRegistry`].
pub struct GatewayMethod {
    op: Operation,
    gateway: Arc<Gateway>,
}

impl GatewayMethod {
    pub fn new(op: Operation, gateway: Arc<Gateway>) -> Self {
        Self { op, gateway }
    }

    pub fn operation(&self) -> Operation {
        self.op
    }
}

impl MethodHandler for GatewayMethod {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn help(&self) -> String {
        self.op.help().to_string()
    }

    /// Command-level check only. Topic rights of the registration calls are
    /// checked in [`Gateway::handle`], once the topic has been decoded.
    fn authorize(&self, command: &str, caller_id: &str, caller: &CallerIdentity) -> bool {
        let command = Operation::from_name(command)
            .map(Operation::command)
            .unwrap_or(command);
        self.gateway
            .policy
            .is_command_allowed(command, caller_id, caller)
    }

    fn execute(
        &self,
        ctx: &CallContext<'_>,
        params: &[RpcValue],
    ) -> Result<StatusTuple, CallFault> {
        self.gateway.handle(self.op, params, ctx.caller)
    }
}

// ============================================================================
// GatewayCell
// ============================================================================

/// Holds the process gateway, constructed at most once.
///
/// Construction runs under a mutex so concurrent first calls cannot build
/// two instances. Request handling itself never touches the lock.
#[derive(Debug, Default)]
pub struct GatewayCell {
    inner: Mutex<Option<Arc<Gateway>>>,
}

impl GatewayCell {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Returns the gateway, building it with `init` on first use.
    ///
    /// If `init` fails the cell stays empty and the next call tries again.
    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<Arc<Gateway>, E>
    where
        F: FnOnce() -> Result<Gateway, E>,
    {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gateway) = guard.as_ref() {
            return Ok(gateway.clone());
        }
        let gateway = Arc::new(init()?);
        info!(options = ?gateway.options, "Constructed gateway");
        *guard = Some(gateway.clone());
        Ok(gateway)
    }

    pub fn get(&self) -> Option<Arc<Gateway>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
