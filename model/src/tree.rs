use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// A single step in a `TreePath`. Only `field` segments exist today, but the
/// variant leaves room for e.g. array indices without changing callers.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum PathSegment {
    Field(String),
}

/// An ordered sequence of segments locating a node in a data tree. An empty
/// path denotes the root.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TreePath(pub Vec<PathSegment>);

impl TreePath {
    pub fn root() -> TreePath {
        TreePath(Vec::new())
    }

    pub fn field(name: impl Into<String>) -> TreePath {
        TreePath(vec![PathSegment::Field(name.into())])
    }

    pub fn push_field(&self, name: impl Into<String>) -> TreePath {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.into()));
        TreePath(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits off the first segment, returning `(head, rest)`, or `None` if
    /// this path is the root.
    pub fn split_first(&self) -> Option<(&str, TreePath)> {
        let (first, rest) = self.0.split_first()?;
        let PathSegment::Field(name) = first;
        Some((name.as_str(), TreePath(rest.to_vec())))
    }
}

impl std::fmt::Display for TreePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        let names: Vec<&str> = self
            .0
            .iter()
            .map(|PathSegment::Field(name)| name.as_str())
            .collect();
        write!(f, "{}", names.join("."))
    }
}

/// The recursive shape of a data tree: either an interior node with named,
/// ordered children, or a typed leaf.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Structure {
    Struct(Vec<(String, Structure)>),
    Value,
}

impl Structure {
    /// Field names declared by a `Struct` node, in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            Structure::Struct(fields) => fields.iter().map(|(name, _)| name.as_str()).collect(),
            Structure::Value => Vec::new(),
        }
    }
}

/// A tagged leaf reference within a `Tree` node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DataRef {
    /// The leaf has never been written: a typed hole.
    Unassigned,
    /// The leaf is explicitly null.
    Null,
    /// The leaf holds a dataset blob at this hash.
    Value(Hash),
    /// Interior pointer to another `Tree` node.
    Tree(Hash),
}

/// A node in the data tree: a mapping from field name to `DataRef`, whose key
/// set equals the corresponding `Structure::Struct`'s field names.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tree(pub BTreeMap<String, DataRef>);

impl Tree {
    pub fn empty() -> Tree {
        Tree(BTreeMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&DataRef> {
        self.0.get(field)
    }

    pub fn with_field(&self, field: &str, value: DataRef) -> Tree {
        let mut fields = self.0.clone();
        fields.insert(field.to_string(), value);
        Tree(fields)
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Tree serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Tree, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed tree: {e}"))
    }
}
