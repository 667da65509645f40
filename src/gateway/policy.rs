//! Authorization seam.
//!
//! The gateway only asks questions; rule storage and evaluation live behind
//! [`AccessPolicy`]. [`StaticPolicy`] covers the common case of fixed deny
//! lists read from configuration.

use crate::config::get_namespaced_strings;
use crate::server::CallerIdentity;
use ::config::Config;
use std::collections::HashSet;
use tracing::debug;

/// Decides whether a caller may perform an operation.
///
/// `caller_id` is the graph name the request claims; `caller` is the network
/// identity of the connection it arrived on.
pub trait AccessPolicy: Send + Sync {
    fn is_command_allowed(&self, command: &str, caller_id: &str, caller: &CallerIdentity) -> bool;

    fn is_publisher_allowed(&self, topic: &str, caller_id: &str, caller: &CallerIdentity) -> bool;

    fn is_subscriber_allowed(&self, topic: &str, caller_id: &str, caller: &CallerIdentity)
        -> bool;
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn is_command_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        true
    }

    fn is_publisher_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        true
    }

    fn is_subscriber_allowed(&self, _: &str, _: &str, _: &CallerIdentity) -> bool {
        true
    }
}

/// Fixed deny lists.
///
/// A caller listed in `deny_callers`, by caller id or by address, is refused
/// everything. Otherwise commands, publish topics and subscribe topics are
/// checked against their own list. Anything not listed is allowed.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    deny_commands: HashSet<String>,
    deny_callers: HashSet<String>,
    deny_publish: HashSet<String>,
    deny_subscribe: HashSet<String>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `access.deny_commands`, `access.deny_callers`,
    /// `access.deny_publish` and `access.deny_subscribe`, each optionally
    /// namespaced under `name`.
    pub fn from_config(config: &Config, name: &str) -> Self {
        let list = |key: &str| -> HashSet<String> {
            get_namespaced_strings(config, name, &format!("access.{key}"))
                .unwrap_or_default()
                .into_iter()
                .collect()
        };
        let policy = Self {
            deny_commands: list("deny_commands"),
            deny_callers: list("deny_callers"),
            deny_publish: list("deny_publish"),
            deny_subscribe: list("deny_subscribe"),
        };
        debug!(?policy, "Loaded static access policy");
        policy
    }

    pub fn deny_command(mut self, command: impl Into<String>) -> Self {
        self.deny_commands.insert(command.into());
        self
    }

    pub fn deny_caller(mut self, caller: impl Into<String>) -> Self {
        self.deny_callers.insert(caller.into());
        self
    }

    pub fn deny_publish(mut self, topic: impl Into<String>) -> Self {
        self.deny_publish.insert(topic.into());
        self
    }

    pub fn deny_subscribe(mut self, topic: impl Into<String>) -> Self {
        self.deny_subscribe.insert(topic.into());
        self
    }

    fn caller_denied(&self, caller_id: &str, caller: &CallerIdentity) -> bool {
        self.deny_callers.contains(caller_id) || self.deny_callers.contains(&caller.address)
    }
}

impl AccessPolicy for StaticPolicy {
    fn is_command_allowed(&self, command: &str, caller_id: &str, caller: &CallerIdentity) -> bool {
        !self.caller_denied(caller_id, caller) && !self.deny_commands.contains(command)
    }

    fn is_publisher_allowed(&self, topic: &str, caller_id: &str, caller: &CallerIdentity) -> bool {
        !self.caller_denied(caller_id, caller) && !self.deny_publish.contains(topic)
    }

    fn is_subscriber_allowed(
        &self,
        topic: &str,
        caller_id: &str,
        caller: &CallerIdentity,
    ) -> bool {
        !self.caller_denied(caller_id, caller) && !self.deny_subscribe.contains(topic)
    }
}
