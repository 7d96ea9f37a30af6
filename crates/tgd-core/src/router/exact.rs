use std::collections::HashMap;

/// Byte-keyed prefix tree mapping discriminants to handlers.
///
/// Lookup walks one node per key byte, so it costs O(key length) no matter
/// how many keys are registered. Keys are arbitrary byte strings.
///
/// Registering a key that already exists replaces the previous value (last
/// write wins); `register` hands the replaced value back so callers can warn.
#[derive(Debug)]
pub struct ExactRouter<V> {
    root: Node<V>,
    len: usize,
}

#[derive(Debug)]
struct Node<V> {
    value: Option<V>,
    children: HashMap<u8, Node<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            value: None,
            children: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

impl<V> Default for ExactRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExactRouter<V> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace. Returns the previous value for `key`, if any.
    pub fn register(&mut self, key: impl AsRef<[u8]>, value: V) -> Option<V> {
        let mut node = &mut self.root;
        for b in key.as_ref() {
            node = node.children.entry(*b).or_insert_with(Node::new);
        }
        let prev = node.value.replace(value);
        if prev.is_none() {
            self.len += 1;
        }
        prev
    }

    pub fn lookup(&self, key: impl AsRef<[u8]>) -> Option<&V> {
        let mut node = &self.root;
        for b in key.as_ref() {
            node = node.children.get(b)?;
        }
        node.value.as_ref()
    }

    /// Remove `key`, pruning branches that no longer lead to any value.
    pub fn unregister(&mut self, key: impl AsRef<[u8]>) -> Option<V> {
        let removed = remove_at(&mut self.root, key.as_ref());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }
}

fn remove_at<V>(node: &mut Node<V>, key: &[u8]) -> Option<V> {
    let Some((first, rest)) = key.split_first() else {
        return node.value.take();
    };
    let child = node.children.get_mut(first)?;
    let removed = remove_at(child, rest);
    if removed.is_some() && child.is_empty() {
        node.children.remove(first);
    }
    removed
}
