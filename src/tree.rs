//! Trees - order-sensitive mappings from key paths to values.
//!
//! A path is an ordered sequence of keys; `["x", "y"]` and `["y", "x"]` are
//! different entries. A map is the depth-1 projection of a tree.

use std::collections::BTreeMap;
use std::slice;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Fallible tree operations shared by in-memory tries, storage units and
/// database handles.
pub trait Tree<K, V> {
    /// Value stored at exactly `path`, if any.
    fn get(&self, path: &[K]) -> Result<Option<V>, DatabaseError>;

    /// Store `value` at `path`, overwriting any previous value.
    fn set(&self, value: V, path: &[K]) -> Result<(), DatabaseError>;

    /// Store `value` at `path` only if no value is there yet.
    /// Returns whether the value was installed.
    fn add(&self, value: V, path: &[K]) -> Result<bool, DatabaseError>;

    /// Remove and return the value at `path`.
    fn remove(&self, path: &[K]) -> Result<Option<V>, DatabaseError>;

    /// Every entry whose path has exactly `depth` keys.
    fn entries(&self, depth: usize) -> Result<Vec<(Vec<K>, V)>, DatabaseError>;

    fn clear(&self) -> Result<(), DatabaseError>;

    fn contains(&self, path: &[K]) -> Result<bool, DatabaseError> {
        Ok(self.get(path)?.is_some())
    }

    /// Number of entries whose path has exactly `depth` keys.
    fn size(&self, depth: usize) -> Result<usize, DatabaseError> {
        Ok(self.entries(depth)?.len())
    }
}

/// Single-level key/value view.
pub trait Map<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>, DatabaseError>;

    fn set(&self, key: &K, value: V) -> Result<(), DatabaseError>;

    fn add(&self, key: &K, value: V) -> Result<bool, DatabaseError>;

    fn remove(&self, key: &K) -> Result<Option<V>, DatabaseError>;

    fn contains_key(&self, key: &K) -> Result<bool, DatabaseError>;

    fn entries(&self) -> Result<Vec<(K, V)>, DatabaseError>;

    fn len(&self) -> Result<usize, DatabaseError>;

    fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.len()? == 0)
    }

    fn clear(&self) -> Result<(), DatabaseError>;
}

/// Depth-1 projection of any [`Tree`].
#[derive(Debug, Clone)]
pub struct TreeMap<T> {
    tree: T,
}

impl<T> TreeMap<T> {
    pub fn new(tree: T) -> Self {
        TreeMap { tree }
    }

    /// The underlying tree.
    pub fn tree(&self) -> &T {
        &self.tree
    }
}

impl<K, V, T: Tree<K, V>> Map<K, V> for TreeMap<T> {
    fn get(&self, key: &K) -> Result<Option<V>, DatabaseError> {
        self.tree.get(slice::from_ref(key))
    }

    fn set(&self, key: &K, value: V) -> Result<(), DatabaseError> {
        self.tree.set(value, slice::from_ref(key))
    }

    fn add(&self, key: &K, value: V) -> Result<bool, DatabaseError> {
        self.tree.add(value, slice::from_ref(key))
    }

    fn remove(&self, key: &K) -> Result<Option<V>, DatabaseError> {
        self.tree.remove(slice::from_ref(key))
    }

    fn contains_key(&self, key: &K) -> Result<bool, DatabaseError> {
        self.tree.contains(slice::from_ref(key))
    }

    fn entries(&self) -> Result<Vec<(K, V)>, DatabaseError> {
        Ok(self
            .tree
            .entries(1)?
            .into_iter()
            .filter_map(|(path, value)| path.into_iter().next().map(|key| (key, value)))
            .collect())
    }

    fn len(&self) -> Result<usize, DatabaseError> {
        self.tree.size(1)
    }

    /// Removes the depth-1 entries. Deeper paths of the underlying tree stay.
    fn clear(&self) -> Result<(), DatabaseError> {
        for (path, _) in self.tree.entries(1)? {
            self.tree.remove(&path)?;
        }
        Ok(())
    }
}

// ============================================================================
// PathTree - in-memory trie
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize + Ord, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
struct Node<K, V> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<V>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<K, Node<K, V>>,
}

impl<K, V> Default for Node<K, V> {
    fn default() -> Self {
        Node {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<K, V> Node<K, V> {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// Trie keyed by paths.
///
/// Valueless nodes are pruned on removal, so two trees holding the same
/// `(path, value)` entries are structurally equal and hash the same. The
/// root (empty path) may hold a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize + Ord, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
#[serde(transparent)]
pub struct PathTree<K, V> {
    root: Node<K, V>,
}

impl<K, V> Default for PathTree<K, V> {
    fn default() -> Self {
        PathTree {
            root: Node::default(),
        }
    }
}

impl<K: Ord + Clone, V> PathTree<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, path: &[K]) -> Option<&Node<K, V>> {
        let mut node = &self.root;
        for key in path {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    fn node_or_insert(&mut self, path: &[K]) -> &mut Node<K, V> {
        let mut node = &mut self.root;
        for key in path {
            node = node.children.entry(key.clone()).or_default();
        }
        node
    }

    pub fn get(&self, path: &[K]) -> Option<&V> {
        self.node(path)?.value.as_ref()
    }

    pub fn contains(&self, path: &[K]) -> bool {
        self.get(path).is_some()
    }

    /// Follow `path` as far as it exists. Returns the consumed prefix and
    /// the value held by the deepest node reached.
    pub fn get_max_descendant<'p>(&self, path: &'p [K]) -> (&'p [K], Option<&V>) {
        let mut node = &self.root;
        let mut depth = 0;
        for key in path {
            match node.children.get(key) {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }
        (&path[..depth], node.value.as_ref())
    }

    /// Store `value` at `path`, returning the value it replaced.
    pub fn set(&mut self, value: V, path: &[K]) -> Option<V> {
        self.node_or_insert(path).value.replace(value)
    }

    /// Store `value` at `path` unless a value is already there.
    pub fn add(&mut self, value: V, path: &[K]) -> bool {
        let (reached, existing) = self.get_max_descendant(path);
        if reached.len() == path.len() && existing.is_some() {
            return false;
        }
        self.node_or_insert(path).value = Some(value);
        true
    }

    pub fn remove(&mut self, path: &[K]) -> Option<V> {
        Self::remove_at(&mut self.root, path)
    }

    fn remove_at(node: &mut Node<K, V>, path: &[K]) -> Option<V> {
        match path.split_first() {
            None => node.value.take(),
            Some((head, rest)) => {
                let child = node.children.get_mut(head)?;
                let removed = Self::remove_at(child, rest);
                if child.is_empty() {
                    node.children.remove(head);
                }
                removed
            }
        }
    }

    /// Keys of the direct children of `path`.
    pub fn children(&self, path: &[K]) -> Vec<&K> {
        self.node(path)
            .map(|node| node.children.keys().collect())
            .unwrap_or_default()
    }

    /// Entries whose path is exactly `depth` keys long.
    pub fn entries(&self, depth: usize) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        let mut prefix = Vec::with_capacity(depth);
        Self::collect(&self.root, &mut prefix, Some(depth), &mut out);
        out
    }

    pub fn size(&self, depth: usize) -> usize {
        self.entries(depth).len()
    }

    /// Every entry, at any depth.
    pub fn all_entries(&self) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        Self::collect(&self.root, &mut prefix, None, &mut out);
        out
    }

    fn collect<'a>(
        node: &'a Node<K, V>,
        prefix: &mut Vec<K>,
        depth: Option<usize>,
        out: &mut Vec<(Vec<K>, &'a V)>,
    ) {
        let at_depth = depth.map_or(true, |d| d == prefix.len());
        if at_depth {
            if let Some(value) = &node.value {
                out.push((prefix.clone(), value));
            }
        }
        if depth.map_or(false, |d| prefix.len() >= d) {
            return;
        }
        for (key, child) in &node.children {
            prefix.push(key.clone());
            Self::collect(child, prefix, depth, out);
            prefix.pop();
        }
    }

    /// Total number of values in the tree.
    pub fn len(&self) -> usize {
        self.all_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
    }
}

impl<K: Ord + Clone, V: Clone> Tree<K, V> for RwLock<PathTree<K, V>> {
    fn get(&self, path: &[K]) -> Result<Option<V>, DatabaseError> {
        Ok(self.read().get(path).cloned())
    }

    fn set(&self, value: V, path: &[K]) -> Result<(), DatabaseError> {
        self.write().set(value, path);
        Ok(())
    }

    fn add(&self, value: V, path: &[K]) -> Result<bool, DatabaseError> {
        Ok(self.write().add(value, path))
    }

    fn remove(&self, path: &[K]) -> Result<Option<V>, DatabaseError> {
        Ok(self.write().remove(path))
    }

    fn entries(&self, depth: usize) -> Result<Vec<(Vec<K>, V)>, DatabaseError> {
        Ok(self
            .read()
            .entries(depth)
            .into_iter()
            .map(|(path, value)| (path, value.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), DatabaseError> {
        self.write().clear();
        Ok(())
    }

    fn size(&self, depth: usize) -> Result<usize, DatabaseError> {
        Ok(self.read().size(depth))
    }
}
