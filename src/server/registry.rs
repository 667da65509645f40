use super::client_info::CallerIdentity;
use crate::error::{CallFault, DecodeError, Error};
use crate::value::{RpcValue, StatusTuple};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LIST_METHODS: &str = "system.listMethods";
pub const METHOD_HELP: &str = "system.methodHelp";

/// What a handler sees of the server while serving one call.
pub struct CallContext<'a> {
    pub registry: &'a MethodRegistry,
    pub caller: &'a CallerIdentity,
}

/// A named unit that serves one RPC method.
///
/// # Example
///
/// ```no_run
/// use rvgate::{CallContext, CallFault, MethodHandler, RpcValue, StatusTuple};
///
/// struct Echo;
///
/// impl MethodHandler for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn execute(
///         &self,
///         _ctx: &CallContext<'_>,
///         params: &[RpcValue],
///     ) -> Result<StatusTuple, CallFault> {
///         Ok(StatusTuple::success("", RpcValue::Array(params.to_vec())))
///     }
/// }
/// ```
pub trait MethodHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Human readable description returned by `system.methodHelp`.
    fn help(&self) -> String {
        String::new()
    }

    /// Access decision for `command` issued by `caller_id` from `caller`.
    fn authorize(&self, _command: &str, _caller_id: &str, _caller: &CallerIdentity) -> bool {
        true
    }

    fn execute(&self, ctx: &CallContext<'_>, params: &[RpcValue])
        -> Result<StatusTuple, CallFault>;
}

/// What [`MethodRegistry::add_method`] does when the name is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Replace the registered handler.
    #[default]
    Overwrite,
    /// Keep the registered handler and fail the registration.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(DuplicatePolicy::Overwrite),
            "reject" => Ok(DuplicatePolicy::Reject),
            _ => Err(Error::InvalidDuplicatePolicy {
                got: s.to_string(),
                valid: vec!["overwrite".to_string(), "reject".to_string()],
            }),
        }
    }
}

/// Method name to handler mapping.
///
/// Names are unique. Introspection (`system.listMethods` and
/// `system.methodHelp`) is disabled by default; once enabled both are ordinary
/// registered methods.
#[derive(Default)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Arc<dyn MethodHandler>>,
    duplicates: DuplicatePolicy,
    introspection: bool,
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("duplicates", &self.duplicates)
            .field("introspection", &self.introspection)
            .finish()
    }
}

impl MethodRegistry {
    /// Creates an empty registry that overwrites duplicates.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(duplicates: DuplicatePolicy) -> Self {
        Self {
            duplicates,
            ..Self::default()
        }
    }

    /// Registers a handler under its declared name.
    ///
    /// Fails only under [`DuplicatePolicy::Reject`] when the name is taken.
    pub fn add_method(&mut self, handler: Arc<dyn MethodHandler>) -> Result<&mut Self, Error> {
        let name = handler.name().to_string();
        if self.methods.contains_key(&name) {
            match self.duplicates {
                DuplicatePolicy::Overwrite => {
                    warn!(method = %name, "Replacing registered method");
                }
                DuplicatePolicy::Reject => {
                    warn!(method = %name, "Rejecting duplicate method");
                    return Err(Error::DuplicateMethod(name));
                }
            }
        }
        debug!(method = %name, "Registering method");
        self.methods.insert(name, handler);
        Ok(self)
    }

    /// Unregisters the method registered under the handler's name.
    pub fn remove_method(&mut self, handler: &dyn MethodHandler) {
        self.remove_method_named(handler.name());
    }

    /// Unregisters a method by name. No-op if absent.
    pub fn remove_method_named(&mut self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        let removed = self.methods.remove(name);
        if removed.is_some() {
            debug!(method = name, "Removed method");
        }
        removed
    }

    pub fn find_method(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.get(name).cloned()
    }

    /// Registered method names in lexical order.
    pub fn list_methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn method_help(&self, name: &str) -> Option<String> {
        self.methods.get(name).map(|handler| handler.help())
    }

    /// Enables or disables the introspection methods.
    pub fn enable_introspection(&mut self, enabled: bool) {
        if enabled == self.introspection {
            return;
        }
        self.introspection = enabled;
        if enabled {
            info!("Enabling introspection");
            self.methods
                .insert(LIST_METHODS.to_string(), Arc::new(ListMethods));
            self.methods
                .insert(METHOD_HELP.to_string(), Arc::new(MethodHelp));
        } else {
            info!("Disabling introspection");
            self.methods.remove(LIST_METHODS);
            self.methods.remove(METHOD_HELP);
        }
    }

    pub fn introspection_enabled(&self) -> bool {
        self.introspection
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ============================================================================
// Introspection Methods
// ============================================================================

struct ListMethods;

impl MethodHandler for ListMethods {
    fn name(&self) -> &str {
        LIST_METHODS
    }

    fn help(&self) -> String {
        "List all methods implemented by this server as an array of names.".to_string()
    }

    fn execute(
        &self,
        ctx: &CallContext<'_>,
        _params: &[RpcValue],
    ) -> Result<StatusTuple, CallFault> {
        let names = ctx
            .registry
            .list_methods()
            .into_iter()
            .map(RpcValue::String)
            .collect::<Vec<_>>();
        Ok(StatusTuple::success("Methods", names))
    }
}

struct MethodHelp;

impl MethodHandler for MethodHelp {
    fn name(&self) -> &str {
        METHOD_HELP
    }

    fn help(&self) -> String {
        "Retrieve the help string for a named method.".to_string()
    }

    fn execute(
        &self,
        ctx: &CallContext<'_>,
        params: &[RpcValue],
    ) -> Result<StatusTuple, CallFault> {
        let [name] = params else {
            return Err(DecodeError::Arity {
                method: METHOD_HELP.to_string(),
                expected: 1,
                got: params.len(),
            }
            .into());
        };
        let RpcValue::String(name) = name else {
            return Err(DecodeError::Type {
                method: METHOD_HELP.to_string(),
                index: 0,
                field: "method",
                expected: "string",
                got: name.type_name(),
            }
            .into());
        };
        match ctx.registry.method_help(name) {
            Some(help) => Ok(StatusTuple::success("Help", help)),
            None => Err(CallFault::UnknownMethod(name.clone())),
        }
    }
}
