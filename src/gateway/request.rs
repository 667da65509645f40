//! Typed request decoding.
//!
//! Each operation has a fixed positional parameter contract. Decoding checks
//! arity and tags once; handlers then work on named fields and
//! [`Request::to_params`] rebuilds the exact positional list for the upstream.

use super::operation::Operation;
use crate::error::DecodeError;
use crate::value::RpcValue;

/// A decoded call, one variant per parameter shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `getUri`, `getPid`, `getTopicTypes`, `getSystemState`, `getRVState`,
    /// `getParamNames`
    CallerOnly { caller_id: String },
    /// `registerPublisher`, `registerSubscriber`
    TopicRegistration {
        caller_id: String,
        topic: String,
        datatype: String,
        caller_uri: String,
    },
    /// `unregisterPublisher`, `unregisterSubscriber`
    TopicRelease {
        caller_id: String,
        topic: String,
        caller_uri: String,
    },
    ServiceRegistration {
        caller_id: String,
        service: String,
        service_uri: String,
        caller_uri: String,
    },
    ServiceRelease {
        caller_id: String,
        service: String,
        service_uri: String,
    },
    /// `lookupService`, `lookupNode`
    Lookup { caller_id: String, name: String },
    Subgraph { caller_id: String, subgraph: String },
    /// `getParam`, `hasParam`, `deleteParam`, `searchParam`
    ParamKey { caller_id: String, key: String },
    ParamAssign {
        caller_id: String,
        key: String,
        value: RpcValue,
    },
    /// `subscribeParam`, `unsubscribeParam`
    ParamSubscription {
        caller_id: String,
        caller_uri: String,
        key: String,
    },
    PublisherUpdate {
        caller_id: String,
        topic: String,
        publishers: Vec<RpcValue>,
    },
}

impl Request {
    /// Decodes the positional parameters of `op`.
    pub fn decode(op: Operation, params: &[RpcValue]) -> Result<Request, DecodeError> {
        let p = Params {
            method: op.name(),
            params,
        };

        let request = match op {
            Operation::GetUri
            | Operation::GetPid
            | Operation::GetTopicTypes
            | Operation::GetSystemState
            | Operation::GetRvState
            | Operation::GetParamNames => {
                p.expect_len(1)?;
                Request::CallerOnly {
                    caller_id: p.string(0, "callerId")?,
                }
            }
            Operation::RegisterPublisher | Operation::RegisterSubscriber => {
                p.expect_len(4)?;
                Request::TopicRegistration {
                    caller_id: p.string(0, "callerId")?,
                    topic: p.string(1, "topic")?,
                    datatype: p.string(2, "datatype")?,
                    caller_uri: p.string(3, "callerUri")?,
                }
            }
            Operation::UnregisterPublisher | Operation::UnregisterSubscriber => {
                p.expect_len(3)?;
                Request::TopicRelease {
                    caller_id: p.string(0, "callerId")?,
                    topic: p.string(1, "topic")?,
                    caller_uri: p.string(2, "callerUri")?,
                }
            }
            Operation::RegisterService => {
                p.expect_len(4)?;
                Request::ServiceRegistration {
                    caller_id: p.string(0, "callerId")?,
                    service: p.string(1, "service")?,
                    service_uri: p.string(2, "serviceUri")?,
                    caller_uri: p.string(3, "callerUri")?,
                }
            }
            Operation::UnregisterService => {
                p.expect_len(3)?;
                Request::ServiceRelease {
                    caller_id: p.string(0, "callerId")?,
                    service: p.string(1, "service")?,
                    service_uri: p.string(2, "serviceUri")?,
                }
            }
            Operation::LookupService => {
                p.expect_len(2)?;
                Request::Lookup {
                    caller_id: p.string(0, "callerId")?,
                    name: p.string(1, "service")?,
                }
            }
            Operation::LookupNode => {
                p.expect_len(2)?;
                Request::Lookup {
                    caller_id: p.string(0, "callerId")?,
                    name: p.string(1, "nodeName")?,
                }
            }
            Operation::GetPublishedTopics => {
                p.expect_len(2)?;
                Request::Subgraph {
                    caller_id: p.string(0, "callerId")?,
                    subgraph: p.string(1, "subgraph")?,
                }
            }
            Operation::GetParam
            | Operation::HasParam
            | Operation::DeleteParam
            | Operation::SearchParam => {
                p.expect_len(2)?;
                Request::ParamKey {
                    caller_id: p.string(0, "callerId")?,
                    key: p.string(1, "key")?,
                }
            }
            Operation::SetParam => {
                p.expect_len(3)?;
                Request::ParamAssign {
                    caller_id: p.string(0, "callerId")?,
                    key: p.string(1, "key")?,
                    value: params[2].clone(),
                }
            }
            Operation::SubscribeParam | Operation::UnsubscribeParam => {
                p.expect_len(3)?;
                Request::ParamSubscription {
                    caller_id: p.string(0, "callerId")?,
                    caller_uri: p.string(1, "callerUri")?,
                    key: p.string(2, "key")?,
                }
            }
            Operation::PublisherUpdate => {
                p.expect_len(3)?;
                Request::PublisherUpdate {
                    caller_id: p.string(0, "callerId")?,
                    topic: p.string(1, "topic")?,
                    publishers: p.array(2, "publishers")?,
                }
            }
        };
        Ok(request)
    }

    pub fn caller_id(&self) -> &str {
        match self {
            Request::CallerOnly { caller_id }
            | Request::TopicRegistration { caller_id, .. }
            | Request::TopicRelease { caller_id, .. }
            | Request::ServiceRegistration { caller_id, .. }
            | Request::ServiceRelease { caller_id, .. }
            | Request::Lookup { caller_id, .. }
            | Request::Subgraph { caller_id, .. }
            | Request::ParamKey { caller_id, .. }
            | Request::ParamAssign { caller_id, .. }
            | Request::ParamSubscription { caller_id, .. }
            | Request::PublisherUpdate { caller_id, .. } => caller_id,
        }
    }

    /// The topic named by a topic-scoped request.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Request::TopicRegistration { topic, .. }
            | Request::TopicRelease { topic, .. }
            | Request::PublisherUpdate { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// The object the call is about, for log lines.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Request::TopicRegistration { topic, .. }
            | Request::TopicRelease { topic, .. }
            | Request::PublisherUpdate { topic, .. } => Some(topic),
            Request::ServiceRegistration { service, .. }
            | Request::ServiceRelease { service, .. } => Some(service),
            Request::Lookup { name, .. } => Some(name),
            Request::Subgraph { subgraph, .. } => Some(subgraph),
            Request::ParamKey { key, .. }
            | Request::ParamAssign { key, .. }
            | Request::ParamSubscription { key, .. } => Some(key),
            Request::CallerOnly { .. } => None,
        }
    }

    /// Rebuilds the positional parameter list in wire order.
    pub fn to_params(&self) -> Vec<RpcValue> {
        let s = |v: &String| RpcValue::String(v.clone());
        match self {
            Request::CallerOnly { caller_id } => vec![s(caller_id)],
            Request::TopicRegistration {
                caller_id,
                topic,
                datatype,
                caller_uri,
            } => vec![s(caller_id), s(topic), s(datatype), s(caller_uri)],
            Request::TopicRelease {
                caller_id,
                topic,
                caller_uri,
            } => vec![s(caller_id), s(topic), s(caller_uri)],
            Request::ServiceRegistration {
                caller_id,
                service,
                service_uri,
                caller_uri,
            } => vec![s(caller_id), s(service), s(service_uri), s(caller_uri)],
            Request::ServiceRelease {
                caller_id,
                service,
                service_uri,
            } => vec![s(caller_id), s(service), s(service_uri)],
            Request::Lookup { caller_id, name } => vec![s(caller_id), s(name)],
            Request::Subgraph {
                caller_id,
                subgraph,
            } => vec![s(caller_id), s(subgraph)],
            Request::ParamKey { caller_id, key } => vec![s(caller_id), s(key)],
            Request::ParamAssign {
                caller_id,
                key,
                value,
            } => vec![s(caller_id), s(key), value.clone()],
            Request::ParamSubscription {
                caller_id,
                caller_uri,
                key,
            } => vec![s(caller_id), s(caller_uri), s(key)],
            Request::PublisherUpdate {
                caller_id,
                topic,
                publishers,
            } => vec![
                s(caller_id),
                s(topic),
                RpcValue::Array(publishers.clone()),
            ],
        }
    }
}

// ============================================================================
// Positional Access
// ============================================================================

struct Params<'a> {
    method: &'static str,
    params: &'a [RpcValue],
}

impl Params<'_> {
    fn expect_len(&self, expected: usize) -> Result<(), DecodeError> {
        if self.params.len() != expected {
            return Err(DecodeError::Arity {
                method: self.method.to_string(),
                expected,
                got: self.params.len(),
            });
        }
        Ok(())
    }

    fn string(&self, index: usize, field: &'static str) -> Result<String, DecodeError> {
        match &self.params[index] {
            RpcValue::String(value) => Ok(value.clone()),
            other => Err(self.type_error(index, field, "string", other)),
        }
    }

    fn array(&self, index: usize, field: &'static str) -> Result<Vec<RpcValue>, DecodeError> {
        match &self.params[index] {
            RpcValue::Array(values) => Ok(values.clone()),
            other => Err(self.type_error(index, field, "array", other)),
        }
    }

    fn type_error(
        &self,
        index: usize,
        field: &'static str,
        expected: &'static str,
        got: &RpcValue,
    ) -> DecodeError {
        DecodeError::Type {
            method: self.method.to_string(),
            index,
            field,
            expected,
            got: got.type_name(),
        }
    }
}
