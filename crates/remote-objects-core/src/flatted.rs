//! Cycle-safe wire format.
//!
//! Values are flattened into a JSON array: entry `0` is the root, and every
//! object, array and string reachable from it is stored once and referenced
//! from its container by its index, written as a decimal string. Numbers,
//! booleans and `null` stay inline. Shared and circular references survive
//! a round trip because containers are referenced by identity.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::error::CodecError;

/// Index of a node inside a [`Graph`].
pub type NodeId = usize;

/// A value position inside a graph: either a primitive or a node reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Node(NodeId),
}

impl Slot {
    /// String content, if this slot holds text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Node id, if this slot references a container.
    #[must_use]
    pub const fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for Slot {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Slot {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Slot {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Slot {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// A container node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Array(Vec<Slot>),
    /// Object entries in insertion order.
    Object(Vec<(String, Slot)>),
}

/// An object graph that may contain shared and circular references.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
    root: Slot,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            root: Slot::Null,
        }
    }
}

impl Graph {
    /// Create a graph holding a single primitive root.
    #[must_use]
    pub const fn primitive(root: Slot) -> Self {
        Self {
            nodes: Vec::new(),
            root,
        }
    }

    /// Root slot.
    #[must_use]
    pub const fn root(&self) -> &Slot {
        &self.root
    }

    /// Replace the root slot.
    pub fn set_root(&mut self, root: Slot) {
        self.root = root;
    }

    /// Same nodes, different root.
    #[must_use]
    pub fn with_root(mut self, root: Slot) -> Self {
        self.root = root;
        self
    }

    /// Add a node and return its id.
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Look up a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Number of nodes in the arena (reachable or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph holds no containers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Read `key` from the object referenced by `slot`.
    #[must_use]
    pub fn field(&self, slot: &Slot, key: &str) -> Option<&Slot> {
        match self.node(slot.as_node()?)? {
            Node::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Node::Array(_) => None,
        }
    }

    /// Object entries of the node referenced by `slot`.
    #[must_use]
    pub fn entries(&self, slot: &Slot) -> Option<&[(String, Slot)]> {
        match self.node(slot.as_node()?)? {
            Node::Object(entries) => Some(entries),
            Node::Array(_) => None,
        }
    }

    /// Build a tree-shaped graph from plain JSON.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let mut graph = Self::default();
        let root = graph.insert_json(value);
        graph.root = root;
        graph
    }

    /// Add a JSON value to the arena and return the slot pointing at it.
    pub fn insert_json(&mut self, value: &Value) -> Slot {
        match value {
            Value::Null => Slot::Null,
            Value::Bool(b) => Slot::Bool(*b),
            Value::Number(n) => Slot::Number(n.clone()),
            Value::String(s) => Slot::String(s.clone()),
            Value::Array(items) => {
                let slots = items.iter().map(|item| self.insert_json(item)).collect();
                Slot::Node(self.push(Node::Array(slots)))
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.insert_json(v)))
                    .collect();
                Slot::Node(self.push(Node::Object(entries)))
            }
        }
    }

    /// Convert the root into plain JSON.
    ///
    /// Shared nodes are expanded once per occurrence.
    ///
    /// # Errors
    /// Returns [`CodecError::Cyclic`] if the graph contains a cycle.
    pub fn to_json(&self) -> Result<Value, CodecError> {
        self.slot_to_json(&self.root)
    }

    /// Convert the value at `slot` into plain JSON.
    ///
    /// # Errors
    /// Returns [`CodecError::Cyclic`] on cycles, or
    /// [`CodecError::Malformed`] on dangling node ids.
    pub fn slot_to_json(&self, slot: &Slot) -> Result<Value, CodecError> {
        let mut visiting = vec![false; self.nodes.len()];
        self.expand(slot, &mut visiting)
    }

    fn expand(&self, slot: &Slot, visiting: &mut [bool]) -> Result<Value, CodecError> {
        let id = match slot {
            Slot::Node(id) => *id,
            primitive => return Ok(primitive_json(primitive)),
        };
        let node = self
            .node(id)
            .ok_or_else(|| CodecError::Malformed(format!("dangling node {id}")))?;
        if visiting[id] {
            return Err(CodecError::Cyclic);
        }
        visiting[id] = true;
        let value = match node {
            Node::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand(item, visiting))
                    .collect::<Result<_, _>>()?,
            ),
            Node::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), self.expand(item, visiting)?);
                }
                Value::Object(map)
            }
        };
        visiting[id] = false;
        Ok(value)
    }
}

fn primitive_json(slot: &Slot) -> Value {
    match slot {
        Slot::Null | Slot::Node(_) => Value::Null,
        Slot::Bool(b) => Value::Bool(*b),
        Slot::Number(n) => Value::Number(n.clone()),
        Slot::String(s) => Value::String(s.clone()),
    }
}

#[derive(Clone)]
enum Entry {
    Text(String),
    Node(NodeId),
}

#[derive(Default)]
struct Table {
    entries: Vec<Entry>,
    strings: HashMap<String, usize>,
    nodes: HashMap<NodeId, usize>,
}

impl Table {
    fn index_of(&mut self, slot: &Slot) -> Option<usize> {
        match slot {
            Slot::String(s) => Some(*self.strings.entry(s.clone()).or_insert_with(|| {
                self.entries.push(Entry::Text(s.clone()));
                self.entries.len() - 1
            })),
            Slot::Node(id) => Some(*self.nodes.entry(*id).or_insert_with(|| {
                self.entries.push(Entry::Node(*id));
                self.entries.len() - 1
            })),
            _ => None,
        }
    }

    fn reference(&mut self, slot: &Slot) -> Value {
        self.index_of(slot)
            .map_or_else(|| primitive_json(slot), |index| Value::String(index.to_string()))
    }
}

/// Encode a graph into flatted text.
///
/// # Errors
/// Returns [`CodecError::Malformed`] if a slot points at a missing node.
pub fn encode(graph: &Graph) -> Result<String, CodecError> {
    let mut table = Table::default();
    if table.index_of(graph.root()).is_none() {
        return Ok(format!("[{}]", primitive_json(graph.root())));
    }

    let mut out = Vec::new();
    let mut i = 0;
    while i < table.entries.len() {
        let value = match table.entries[i].clone() {
            Entry::Text(text) => Value::String(text),
            Entry::Node(id) => {
                match graph.node(id) {
                    Some(Node::Array(items)) => {
                        Value::Array(items.iter().map(|item| table.reference(item)).collect())
                    }
                    Some(Node::Object(entries)) => {
                        let mut map = Map::with_capacity(entries.len());
                        for (key, item) in entries {
                            map.insert(key.clone(), table.reference(item));
                        }
                        Value::Object(map)
                    }
                    None => return Err(CodecError::Malformed(format!("dangling node {id}"))),
                }
            }
        };
        out.push(serde_json::to_string(&value)?);
        i += 1;
    }
    Ok(format!("[{}]", out.join(",")))
}

/// Decode flatted text into a graph.
///
/// # Errors
/// Returns [`CodecError`] when the text is not JSON, is not a non-empty
/// array, or contains references that do not resolve.
pub fn decode(text: &str) -> Result<Graph, CodecError> {
    let input = match serde_json::from_str::<Value>(text)? {
        Value::Array(items) if !items.is_empty() => items,
        Value::Array(_) => return Err(CodecError::Malformed("empty input".into())),
        _ => return Err(CodecError::Malformed("expected a JSON array".into())),
    };

    let mut graph = Graph::default();
    let ids: Vec<Option<NodeId>> = input
        .iter()
        .map(|entry| match entry {
            Value::Array(_) | Value::Object(_) => Some(graph.push(Node::Array(Vec::new()))),
            _ => None,
        })
        .collect();

    for (entry, id) in input.iter().zip(&ids) {
        let Some(id) = *id else { continue };
        let node = match entry {
            Value::Array(items) => Node::Array(
                items
                    .iter()
                    .map(|item| revive(item, &input, &ids))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Node::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), revive(v, &input, &ids)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
            _ => continue,
        };
        graph.nodes[id] = node;
    }

    graph.root = match (&input[0], ids[0]) {
        (_, Some(id)) => Slot::Node(id),
        (Value::String(s), None) => Slot::String(s.clone()),
        (primitive, None) => inline(primitive)?,
    };
    Ok(graph)
}

fn revive(value: &Value, input: &[Value], ids: &[Option<NodeId>]) -> Result<Slot, CodecError> {
    let Value::String(index) = value else {
        return inline(value);
    };
    let index: usize = index
        .parse()
        .map_err(|_| CodecError::Malformed(format!("invalid reference {index:?}")))?;
    match (input.get(index), ids.get(index).copied().flatten()) {
        (Some(_), Some(id)) => Ok(Slot::Node(id)),
        (Some(Value::String(s)), None) => Ok(Slot::String(s.clone())),
        (Some(primitive), None) => inline(primitive),
        (None, _) => Err(CodecError::Malformed(format!("reference {index} out of range"))),
    }
}

fn inline(value: &Value) -> Result<Slot, CodecError> {
    match value {
        Value::Null => Ok(Slot::Null),
        Value::Bool(b) => Ok(Slot::Bool(*b)),
        Value::Number(n) => Ok(Slot::Number(n.clone())),
        Value::String(s) => Ok(Slot::String(s.clone())),
        Value::Array(_) | Value::Object(_) => {
            Err(CodecError::Malformed("nested container without an index".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitive_roots() {
        assert_eq!(encode(&Graph::primitive(Slot::from(2))).unwrap(), "[2]");
        assert_eq!(encode(&Graph::primitive(Slot::Null)).unwrap(), "[null]");
        assert_eq!(encode(&Graph::primitive("x".into())).unwrap(), r#"["x"]"#);

        assert_eq!(decode("[2]").unwrap().root(), &Slot::from(2));
        assert_eq!(decode(r#"["x"]"#).unwrap().root(), &Slot::from("x"));
    }

    #[test]
    fn test_matches_reference_layout() {
        let graph = Graph::from_json(&json!({"result": {"abc": "path"}, "n": 1}));
        assert_eq!(
            encode(&graph).unwrap(),
            r#"[{"result":"1","n":1},{"abc":"2"},"path"]"#
        );
    }

    #[test]
    fn test_strings_are_deduplicated() {
        let graph = Graph::from_json(&json!(["a", "a", "b"]));
        assert_eq!(encode(&graph).unwrap(), r#"[["1","1","2"],"a","b"]"#);
    }

    #[test]
    fn test_json_roundtrip() {
        let value = json!({
            "uid": "u1",
            "list": [1, 2.5, true, null, {"deep": ["x"]}],
            "empty": {},
        });
        let text = encode(&Graph::from_json(&value)).unwrap();
        assert_eq!(decode(&text).unwrap().to_json().unwrap(), value);
    }

    #[test]
    fn test_shared_reference_survives() {
        let mut graph = Graph::default();
        let shared = graph.push(Node::Object(vec![("v".into(), Slot::from(1))]));
        let root = graph.push(Node::Object(vec![
            ("a".into(), Slot::Node(shared)),
            ("b".into(), Slot::Node(shared)),
        ]));
        graph.set_root(Slot::Node(root));

        let text = encode(&graph).unwrap();
        assert_eq!(text, r#"[{"a":"1","b":"1"},{"v":1}]"#);

        let decoded = decode(&text).unwrap();
        let a = decoded.field(decoded.root(), "a").unwrap();
        let b = decoded.field(decoded.root(), "b").unwrap();
        assert_eq!(a, b);
        assert!(a.as_node().is_some());
    }

    #[test]
    fn test_cycle_survives() {
        let mut graph = Graph::default();
        let root = graph.push(Node::Object(Vec::new()));
        if let Some(Node::Object(entries)) = graph.node_mut(root) {
            entries.push(("self".into(), Slot::Node(root)));
        }
        graph.set_root(Slot::Node(root));

        let text = encode(&graph).unwrap();
        assert_eq!(text, r#"[{"self":"0"}]"#);

        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.field(decoded.root(), "self"), Some(decoded.root()));
        assert!(matches!(decoded.to_json(), Err(CodecError::Cyclic)));
        assert_eq!(encode(&decoded).unwrap(), text);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(decode("not json").is_err());
        assert!(decode("[]").is_err());
        assert!(decode(r#"{"uid":"u1"}"#).is_err());
        assert!(decode(r#"[{"a":"7"}]"#).is_err());
        assert!(decode(r#"[{"a":"x"}]"#).is_err());
        assert!(decode(r#"[{"a":{"inline":1}}]"#).is_err());
    }
}
