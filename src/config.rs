//! Configuration lookup and gateway settings.
//!
//! Every key can be namespaced: `{name}.{key}` is tried first, then `{key}`,
//! then the hard-coded default.

use crate::error::Error;
use crate::server::DuplicatePolicy;
use ::config::Config;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Environment variable holding the address clients use to reach the master.
pub const MASTER_URI_ENV: &str = "ROS_MASTER_URI";
pub const DEFAULT_MASTER_HOST: &str = "localhost";
pub const DEFAULT_MASTER_PORT: u16 = 11311;

const DEFAULT_BACKLOG: i32 = 5;
const DEFAULT_POLL_CAPACITY: usize = 128;
const DEFAULT_MAX_READ_SIZE: usize = 64 * 1024;
const DEFAULT_UPSTREAM_URI: &str = "http://127.0.0.1:11312/";
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MONITOR_NODE: &str = "/rvmonitor";
const DEFAULT_MONITOR_PREFIX: &str = "/rv/monitored";

// ============================================================================
// Namespaced Lookup
// ============================================================================

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_u64(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u64, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key))
}

pub(crate) fn get_namespaced_i32(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<i32, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<i32>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}

pub(crate) fn get_namespaced_strings(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<Vec<String>, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<Vec<String>>(key))
}

// ============================================================================
// MasterAddress
// ============================================================================

/// A `host:port` pair naming a master endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddress {
    pub host: String,
    pub port: u16,
}

impl MasterAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `http://host:port/` or a bare `host:port`.
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let trimmed = uri.trim();
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("http://{trimmed}"))
        }
        .map_err(|_| Error::InvalidMasterUri(uri.to_string()))?;

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidMasterUri(uri.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidMasterUri(uri.to_string()))?;

        Ok(Self::new(host, port))
    }

    /// Reads [`MASTER_URI_ENV`] once.
    ///
    /// Falls back to `localhost:11311` when unset. `localhost` is replaced by
    /// the machine's host name.
    pub fn from_env() -> Result<Self, Error> {
        let address = match std::env::var(MASTER_URI_ENV) {
            Ok(uri) => Self::parse(&uri)?,
            Err(_) => Self::new(DEFAULT_MASTER_HOST, DEFAULT_MASTER_PORT),
        };
        Ok(address.resolve_localhost())
    }

    /// Replaces a `localhost` host with the machine's host name.
    pub fn resolve_localhost(self) -> Self {
        if self.host != "localhost" {
            return self;
        }
        match local_hostname() {
            Some(host) => Self::new(host, self.port),
            None => {
                warn!("Could not determine host name, keeping localhost");
                self
            }
        }
    }

    pub fn to_uri(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Formats the address for `ToSocketAddrs`.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for MasterAddress {
    fn default() -> Self {
        Self::new(DEFAULT_MASTER_HOST, DEFAULT_MASTER_PORT)
    }
}

fn local_hostname() -> Option<String> {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|host| !host.is_empty())
}

// ============================================================================
// GatewaySettings
// ============================================================================

/// Everything the gateway process needs from configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// The address clients use for the master, i.e. this gateway.
    pub master: MasterAddress,
    pub listen_port: u16,
    pub backlog: i32,
    pub poll_capacity: usize,
    pub max_read_size: usize,
    pub max_frame_size: usize,
    /// The real registry that calls are forwarded to.
    pub upstream: MasterAddress,
    pub upstream_timeout: Duration,
    pub introspection: bool,
    pub duplicate_methods: DuplicatePolicy,
    /// Caller id exempt from monitored topic redirection.
    pub monitor_node: String,
    pub monitor_prefix: String,
    pub monitor_topics: Vec<String>,
}

impl GatewaySettings {
    /// Creates settings from configuration.
    ///
    /// # Configuration Keys
    ///
    /// - `listen_port` (defaults to the port of `master`)
    /// - `backlog`, `poll_capacity`, `max_read_size`, `max_frame_size`
    /// - `upstream_uri`, `upstream_timeout_ms`
    /// - `introspection`, `duplicate_methods` ("overwrite" or "reject")
    /// - `monitor_node`, `monitor_prefix`, `monitor_topics`
    pub fn new(config: &Config, master: MasterAddress) -> Result<Self, Error> {
        Self::new_named(config, "", master)
    }

    /// Creates settings with configuration namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `gateway.listen_port`)
    /// 2. `{key}` (e.g., `listen_port`)
    /// 3. Hard-coded default
    pub fn new_named(config: &Config, name: &str, master: MasterAddress) -> Result<Self, Error> {
        let listen_port = match get_namespaced_usize(config, name, "listen_port") {
            Ok(port) => u16::try_from(port)
                .map_err(|_| Error::InvalidAddress(format!("listen_port {port} out of range")))?,
            Err(_) => master.port,
        };

        let upstream_uri = get_namespaced_string(config, name, "upstream_uri")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_URI.to_string());
        let upstream = MasterAddress::parse(&upstream_uri)?;

        let duplicate_methods = match get_namespaced_string(config, name, "duplicate_methods") {
            Ok(policy) => policy.parse()?,
            Err(_) => DuplicatePolicy::default(),
        };

        let settings = Self {
            listen_port,
            backlog: get_namespaced_i32(config, name, "backlog").unwrap_or(DEFAULT_BACKLOG),
            poll_capacity: get_namespaced_usize(config, name, "poll_capacity")
                .unwrap_or(DEFAULT_POLL_CAPACITY),
            max_read_size: get_namespaced_usize(config, name, "max_read_size")
                .unwrap_or(DEFAULT_MAX_READ_SIZE),
            max_frame_size: get_namespaced_usize(config, name, "max_frame_size")
                .unwrap_or(crate::codec::DEFAULT_MAX_FRAME_SIZE),
            upstream,
            upstream_timeout: Duration::from_millis(
                get_namespaced_u64(config, name, "upstream_timeout_ms")
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS),
            ),
            introspection: get_namespaced_bool(config, name, "introspection").unwrap_or(false),
            duplicate_methods,
            monitor_node: get_namespaced_string(config, name, "monitor_node")
                .unwrap_or_else(|_| DEFAULT_MONITOR_NODE.to_string()),
            monitor_prefix: get_namespaced_string(config, name, "monitor_prefix")
                .unwrap_or_else(|_| DEFAULT_MONITOR_PREFIX.to_string()),
            monitor_topics: get_namespaced_strings(config, name, "monitor_topics")
                .unwrap_or_default(),
            master,
        };

        info!(
            master = %settings.master.to_uri(),
            upstream = %settings.upstream.to_uri(),
            listen_port = settings.listen_port,
            "Loaded gateway settings"
        );
        Ok(settings)
    }
}
