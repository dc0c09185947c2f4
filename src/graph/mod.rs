//! Cluster relatedness networks.
//!
//! Networks arrive from the rendering collaborator as GraphML. Only what the
//! pruning step needs is modelled: declared keys, nodes and edges with their
//! `<data>` children, kept in document order so a rewritten file stays close
//! to the original.

pub mod graphml;
pub mod subgraph;

use std::collections::{BTreeSet, HashSet};

pub use subgraph::{annotate, prune, QUERY_LABEL, REF_LABEL, REF_QUERY_ATTR};

/// `<key>` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphKey {
    pub id: String,
    /// Element kind the key applies to: `node`, `edge`, `graph` or `all`
    pub domain: String,
    pub name: String,
    pub attr_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    /// `(key id, value)` pairs in document order
    pub data: Vec<(String, String)>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.data.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.data.push((key.to_string(), value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    pub data: Vec<(String, String)>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    pub id: Option<String>,
    pub edge_default: String,
    pub keys: Vec<GraphKey>,
    pub data: Vec<(String, String)>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            id: None,
            edge_default: "undirected".to_string(),
            keys: Vec::new(),
            data: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl Graph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Key id declared for the node attribute called `name`.
    pub fn node_key(&self, name: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|k| k.name == name && (k.domain == "node" || k.domain == "all"))
            .map(|k| k.id.as_str())
    }

    /// Key id for node attribute `name`, declaring it if necessary.
    pub fn ensure_node_key(&mut self, name: &str, attr_type: &str) -> String {
        if let Some(id) = self.node_key(name) {
            return id.to_string();
        }
        let mut id = name.to_string();
        while self.keys.iter().any(|k| k.id == id) {
            id.push('_');
        }
        self.keys.push(GraphKey {
            id: id.clone(),
            domain: "node".to_string(),
            name: name.to_string(),
            attr_type: attr_type.to_string(),
        });
        id
    }

    /// Value of node attribute `name`, e.g. the sample label stored under `id`.
    pub fn node_attr<'a>(&self, node: &'a Node, name: &str) -> Option<&'a str> {
        self.node_key(name).and_then(|key| node.get(key))
    }

    /// Undirected neighbours of every node in `of`, excluding `of` itself.
    pub fn neighbours(&self, of: &HashSet<&str>) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter_map(|e| {
                match (of.contains(e.source.as_str()), of.contains(e.target.as_str())) {
                    (true, false) => Some(e.target.clone()),
                    (false, true) => Some(e.source.clone()),
                    _ => None,
                }
            })
            .collect()
    }

    /// Subgraph induced by `keep`: those nodes plus every edge between them.
    pub fn induced(&self, keep: &HashSet<String>) -> Graph {
        Graph {
            id: self.id.clone(),
            edge_default: self.edge_default.clone(),
            keys: self.keys.clone(),
            data: self.data.clone(),
            nodes: self
                .nodes
                .iter()
                .filter(|n| keep.contains(&n.id))
                .cloned()
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
                .cloned()
                .collect(),
        }
    }
}
