use std::collections::{BTreeSet, HashSet};

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::graph::Graph;

/// Node attribute marking query vs reference samples.
pub const REF_QUERY_ATTR: &str = "ref_query";
pub const QUERY_LABEL: &str = "query";
pub const REF_LABEL: &str = "ref";

/// Node attribute holding the sample name.
const SAMPLE_NAME_ATTR: &str = "id";

/// Tag every node as `query` or `ref` depending on whether its sample name is
/// one of `query_names`. Returns the GraphML ids of the query nodes.
pub fn annotate(graph: &mut Graph, query_names: &HashSet<String>) -> BTreeSet<String> {
    let name_key = graph.node_key(SAMPLE_NAME_ATTR).map(str::to_string);
    let ref_query_key = graph.ensure_node_key(REF_QUERY_ATTR, "string");

    let mut queries = BTreeSet::new();
    for node in &mut graph.nodes {
        let is_query = name_key
            .as_deref()
            .and_then(|key| node.get(key))
            .map(|name| query_names.contains(name))
            .unwrap_or(false);
        if is_query {
            queries.insert(node.id.clone());
        }
        node.set(
            &ref_query_key,
            if is_query { QUERY_LABEL } else { REF_LABEL },
        );
    }
    queries
}

/// Reduce `graph` to at most `max_nodes` vertices centred on the query samples.
///
/// Graphs already within the bound are only annotated. Larger graphs keep
/// every query node, then fill the remaining capacity with direct neighbours
/// of the queries, sampled uniformly at random when there are too many. The
/// result is the subgraph induced by the kept nodes; it can fall short of
/// `max_nodes` when the queries have few neighbours, and exceeds it only when
/// the queries alone do.
pub fn prune<R: Rng + ?Sized>(
    graph: &Graph,
    query_names: &HashSet<String>,
    max_nodes: usize,
    rng: &mut R,
) -> Graph {
    let mut annotated = graph.clone();
    let queries = annotate(&mut annotated, query_names);
    if annotated.node_count() <= max_nodes {
        return annotated;
    }

    let query_refs: HashSet<&str> = queries.iter().map(String::as_str).collect();
    let neighbours = annotated.neighbours(&query_refs);
    let capacity = max_nodes.saturating_sub(queries.len());

    let mut keep: HashSet<String> = queries.iter().cloned().collect();
    if neighbours.len() > capacity {
        keep.extend(neighbours.into_iter().choose_multiple(rng, capacity));
    } else {
        keep.extend(neighbours);
    }

    tracing::debug!(
        nodes = annotated.node_count(),
        queries = queries.len(),
        kept = keep.len(),
        "Network pruned"
    );
    annotated.induced(&keep)
}
