//! Statistics tree model
//!
//! Uploaded statistics are arbitrarily nested JSON. Rather than probing
//! `serde_json::Value` ad hoc, every component works on [`StatTree`], a small
//! recursive sum type, and walks it either with direct pattern matching or
//! with a [`TreeVisitor`].
//!
//! Maps are ordered by key, so a tree serializes identically no matter how
//! many times it is copied or patched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Largest integer magnitude that round-trips exactly through f64
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A node in a statistics tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum StatTree {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<StatTree>),
    Map(BTreeMap<String, StatTree>),
}

/// One step of a path into a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Property access on a map
    Key(String),
    /// Index access on a list
    Index(usize),
}

/// Render a path in the `a.b[2].c` notation used by hydration payloads
pub fn render_path(steps: &[PathStep]) -> String {
    let mut out = String::new();
    for step in steps {
        match step {
            PathStep::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathStep::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Read-only visitor over every node of a tree, parents before children
pub trait TreeVisitor {
    fn visit(&mut self, path: &[PathStep], node: &StatTree);
}

impl StatTree {
    /// An empty map node
    pub fn empty_map() -> Self {
        StatTree::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StatTree::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, StatTree::Map(_))
    }

    /// Numeric value, if this node is a finite number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatTree::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatTree::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<StatTree>> {
        match self {
            StatTree::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<StatTree>> {
        match self {
            StatTree::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StatTree>> {
        match self {
            StatTree::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, StatTree>> {
        match self {
            StatTree::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Child of a map node by key
    pub fn get(&self, key: &str) -> Option<&StatTree> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Follow a dotted property path (`volume.total_sent`)
    ///
    /// Only property steps are supported; a missing key or a non-map
    /// intermediate yields `None`.
    pub fn get_path(&self, dotted: &str) -> Option<&StatTree> {
        dotted
            .split('.')
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, key| node.get(key))
    }

    /// Finite number at a dotted path
    pub fn number_at(&self, dotted: &str) -> Option<f64> {
        self.get_path(dotted).and_then(StatTree::as_f64)
    }

    /// Walk the tree depth-first, calling the visitor on every node
    pub fn walk<V: TreeVisitor + ?Sized>(&self, visitor: &mut V) {
        let mut path = Vec::new();
        self.walk_inner(&mut path, visitor);
    }

    fn walk_inner<V: TreeVisitor + ?Sized>(&self, path: &mut Vec<PathStep>, visitor: &mut V) {
        visitor.visit(path, self);
        match self {
            StatTree::Map(map) => {
                for (key, child) in map {
                    path.push(PathStep::Key(key.clone()));
                    child.walk_inner(path, visitor);
                    path.pop();
                }
            }
            StatTree::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(PathStep::Index(index));
                    child.walk_inner(path, visitor);
                    path.pop();
                }
            }
            _ => {}
        }
    }

    /// Short name of the node kind, used in log messages
    pub fn kind(&self) -> &'static str {
        match self {
            StatTree::Null => "null",
            StatTree::Bool(_) => "bool",
            StatTree::Number(_) => "number",
            StatTree::String(_) => "string",
            StatTree::List(_) => "list",
            StatTree::Map(_) => "map",
        }
    }
}

impl From<Value> for StatTree {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StatTree::Null,
            Value::Bool(b) => StatTree::Bool(b),
            Value::Number(n) => n.as_f64().map(StatTree::Number).unwrap_or(StatTree::Null),
            Value::String(s) => StatTree::String(s),
            Value::Array(items) => StatTree::List(items.into_iter().map(StatTree::from).collect()),
            Value::Object(map) => StatTree::Map(
                map.into_iter()
                    .map(|(key, value)| (key, StatTree::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<StatTree> for Value {
    fn from(tree: StatTree) -> Self {
        match tree {
            StatTree::Null => Value::Null,
            StatTree::Bool(b) => Value::Bool(b),
            StatTree::Number(n) => {
                // Integral counts go back out as JSON integers
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            StatTree::String(s) => Value::String(s),
            StatTree::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            StatTree::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<f64> for StatTree {
    fn from(n: f64) -> Self {
        StatTree::Number(n)
    }
}

impl From<&str> for StatTree {
    fn from(s: &str) -> Self {
        StatTree::String(s.to_string())
    }
}

impl fmt::Display for StatTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = Value::from(self.clone());
        write!(f, "{}", value)
    }
}
