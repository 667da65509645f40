//! Request decoding, operation table and graph name helpers.

mod common;

use common::*;
use rvgate::{
    collapse_separators, filter_topic_pairs, monitored_alias, resolve_subgraph, upward_keys,
    Access, DecodeError, Operation, Request, RpcValue,
};

// ============================================================================
// Operation Table
// ============================================================================

#[test]
fn operation_names_are_unique_and_resolvable() {
    for op in Operation::ALL {
        assert_eq!(Operation::from_name(op.name()), Some(op));
        assert!(!op.help().is_empty(), "{op} has no help");
    }
    assert_eq!(Operation::from_name("requestTopic"), None);
    assert_eq!(Operation::from_name("getRVState"), Some(Operation::GetRvState));
}

#[test]
fn operation_access_checks() {
    assert_eq!(Operation::RegisterPublisher.access(), Access::Publisher);
    assert_eq!(Operation::UnregisterPublisher.access(), Access::Publisher);
    assert_eq!(Operation::RegisterSubscriber.access(), Access::Subscriber);
    assert_eq!(Operation::UnregisterSubscriber.access(), Access::Subscriber);
    assert_eq!(Operation::RegisterService.access(), Access::Command);
    assert_eq!(Operation::GetParamNames.command(), "getParam");
    assert_eq!(Operation::SearchParam.command(), "searchParam");
    assert!(Operation::GetRvState.is_local());
    assert!(!Operation::GetUri.is_local());
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn every_operation_decodes_its_sample_and_rebuilds_it() {
    for op in Operation::ALL {
        let params = sample_params(op);
        let request = Request::decode(op, &params).unwrap_or_else(|err| panic!("{op}: {err}"));
        assert_eq!(request.caller_id(), "/ns/node");
        assert_eq!(request.to_params(), params, "{op}");
    }
}

#[test]
fn topic_is_exposed_for_topic_calls_only() {
    let register = Request::decode(
        Operation::RegisterSubscriber,
        &sample_params(Operation::RegisterSubscriber),
    )
    .expect("decode failed");
    let lookup = Request::decode(Operation::LookupService, &sample_params(Operation::LookupService))
        .expect("decode failed");

    assert_eq!(register.topic(), Some("/chatter"));
    assert_eq!(lookup.topic(), None);
    assert_eq!(lookup.subject(), Some("/add_two_ints"));
}

#[test]
fn set_param_keeps_any_value_type() {
    let value = RpcValue::Struct(
        [("gain".to_string(), RpcValue::Double(0.5))]
            .into_iter()
            .collect(),
    );
    let request = Request::decode(Operation::SetParam, &[s("/node"), s("/pid"), value.clone()])
        .expect("decode failed");

    assert_eq!(
        request,
        Request::ParamAssign {
            caller_id: "/node".to_string(),
            key: "/pid".to_string(),
            value,
        }
    );
}

#[test]
fn wrong_arity_is_reported() {
    let err = Request::decode(Operation::GetUri, &[]).expect_err("empty params");
    assert_eq!(
        err,
        DecodeError::Arity {
            method: "getUri".to_string(),
            expected: 1,
            got: 0,
        }
    );

    let err = Request::decode(Operation::HasParam, &[s("/node"), s("k"), s("extra")])
        .expect_err("extra param");
    assert!(matches!(err, DecodeError::Arity { expected: 2, got: 3, .. }));
}

#[test]
fn wrong_type_names_the_field() {
    let err = Request::decode(
        Operation::LookupNode,
        &[s("/node"), RpcValue::Int(3)],
    )
    .expect_err("int node name");

    assert_eq!(
        err,
        DecodeError::Type {
            method: "lookupNode".to_string(),
            index: 1,
            field: "nodeName",
            expected: "string",
            got: "int",
        }
    );

    let err = Request::decode(
        Operation::PublisherUpdate,
        &[s("/node"), s("/chatter"), s("http://talker:4001/")],
    )
    .expect_err("publishers must be an array");
    assert!(matches!(err, DecodeError::Type { index: 2, expected: "array", .. }));
}

// ============================================================================
// Names
// ============================================================================

#[test]
fn subgraph_resolution() {
    assert_eq!(resolve_subgraph("/ns/node", ""), "");
    assert_eq!(resolve_subgraph("/ns/node", "/a"), "/a");
    assert_eq!(resolve_subgraph("/ns/node", "b"), "/ns/b");
    assert_eq!(resolve_subgraph("/node", "b"), "/b");
    assert_eq!(resolve_subgraph("node", "b"), "b");
}

#[test]
fn separator_collapse() {
    assert_eq!(collapse_separators("/a//b"), "/a/b");
    assert_eq!(collapse_separators("///a////b/"), "/a/b/");
    assert_eq!(collapse_separators("/a/b"), "/a/b");
}

#[test]
fn upward_key_order() {
    assert_eq!(upward_keys("/a/b/c", "k"), vec!["/a/b/c/k", "/a/b/k", "/a/k", "/k"]);
    assert_eq!(upward_keys("", "k"), vec!["/k"]);
    assert_eq!(upward_keys("node", "k"), vec!["node/k"]);
}

#[test]
fn topic_pair_filter_keeps_order_and_drops_malformed() {
    let pairs = vec![
        pair("/a/z", "t1"),
        RpcValue::Int(4),
        pair("/b", "t2"),
        RpcValue::Array(vec![]),
        pair("/a/y", "t3"),
    ];

    assert_eq!(
        filter_topic_pairs(&pairs, "/a"),
        vec![pair("/a/z", "t1"), pair("/a/y", "t3")]
    );
}

#[test]
fn alias_prefixes_topic() {
    assert_eq!(monitored_alias("/rv/monitored", "/chatter"), "/rv/monitored/chatter");
}
