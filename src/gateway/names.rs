//! Graph name helpers used by the request transforms.

use crate::value::RpcValue;

/// Resolves a subgraph filter against the caller's namespace.
///
/// Empty and rooted subgraphs are returned unchanged. Otherwise everything up
/// to and including the last `/` of `caller_id` is prepended.
pub fn resolve_subgraph(caller_id: &str, subgraph: &str) -> String {
    if subgraph.is_empty() || subgraph.starts_with('/') {
        return subgraph.to_string();
    }
    let namespace = match caller_id.rfind('/') {
        Some(pos) => &caller_id[..=pos],
        None => "",
    };
    format!("{namespace}{subgraph}")
}

/// Collapses every `//` into `/`.
pub fn collapse_separators(name: &str) -> String {
    let mut collapsed = name.to_string();
    while collapsed.contains("//") {
        collapsed = collapsed.replace("//", "/");
    }
    collapsed
}

/// Candidate keys for an upward search, most specific first.
///
/// `("/a/b/c", "k")` yields `/a/b/c/k`, `/a/b/k`, `/a/k`, `/k`. A namespace
/// without any separator yields just `{namespace}/{key}`.
pub fn upward_keys(namespace: &str, key: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut ns = namespace;
    loop {
        keys.push(format!("{ns}/{key}"));
        if ns.is_empty() {
            break;
        }
        match ns.rfind('/') {
            Some(pos) => ns = &ns[..pos],
            None => break,
        }
    }
    keys
}

/// Keeps the `[topic, type]` pairs whose topic starts with `prefix`.
///
/// Order is preserved. Entries that are not a pair led by a string are
/// dropped.
pub fn filter_topic_pairs(pairs: &[RpcValue], prefix: &str) -> Vec<RpcValue> {
    pairs
        .iter()
        .filter(|pair| {
            pair.as_array()
                .and_then(|fields| fields.first())
                .and_then(RpcValue::as_str)
                .is_some_and(|topic| topic.starts_with(prefix))
        })
        .cloned()
        .collect()
}
