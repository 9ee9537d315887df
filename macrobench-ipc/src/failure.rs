//! Failure trees
//!
//! A worker failure is a chain of errors, possibly with suppressed siblings. It is
//! flattened into an arena so it can be archived: node 0 is the outermost error,
//! `cause` and `suppressed` hold indices into the same arena.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use std::error::Error;
use std::fmt;

/// Categories of benchmark failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Wrapper added by the worker or supervisor around the real failure
    Wrapper,
    /// The macro under test or a hook raised a runtime fault
    Script,
    /// Snapshot or host configuration could not be loaded
    Bootstrap,
    /// Rust panic (caught)
    Panic,
    /// Unknown error
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Wrapper => "wrapper",
            FailureKind::Script => "script",
            FailureKind::Bootstrap => "bootstrap",
            FailureKind::Panic => "panic",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One error in a failure tree.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct FailureNode {
    /// Category
    pub kind: FailureKind,
    /// Display text of the error
    pub message: String,
    /// Index of the error that caused this one
    pub cause: Option<u32>,
    /// Indices of errors suppressed while handling this one
    pub suppressed: Vec<u32>,
}

/// Arena of failure nodes rooted at index 0.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct FailureTree {
    nodes: Vec<FailureNode>,
}

impl FailureTree {
    /// Tree with a single root node.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            nodes: vec![FailureNode {
                kind,
                message: message.into(),
                cause: None,
                suppressed: Vec::new(),
            }],
        }
    }

    /// Tree whose root is `error` and whose cause chain follows `Error::source`.
    pub fn from_error(kind: FailureKind, error: &(dyn Error + 'static)) -> Self {
        let mut tree = Self::new(kind, error.to_string());
        let mut parent = 0;
        let mut source = error.source();
        while let Some(err) = source {
            let idx = tree.push(kind, err.to_string());
            tree.nodes[parent as usize].cause = Some(idx);
            parent = idx;
            source = err.source();
        }
        tree
    }

    /// Outermost error.
    pub fn root(&self) -> &FailureNode {
        &self.nodes[0]
    }

    /// Node by index, `None` for dangling references.
    pub fn node(&self, idx: u32) -> Option<&FailureNode> {
        self.nodes.get(idx as usize)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has a root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Add a detached node and return its index.
    pub fn push(&mut self, kind: FailureKind, message: impl Into<String>) -> u32 {
        self.nodes.push(FailureNode {
            kind,
            message: message.into(),
            cause: None,
            suppressed: Vec::new(),
        });
        (self.nodes.len() - 1) as u32
    }

    /// Record `child` as the cause of `parent`.
    pub fn set_cause(&mut self, parent: u32, child: u32) {
        if let Some(node) = self.nodes.get_mut(parent as usize) {
            node.cause = Some(child);
        }
    }

    /// Record `child` as suppressed by `parent`.
    pub fn add_suppressed(&mut self, parent: u32, child: u32) {
        if let Some(node) = self.nodes.get_mut(parent as usize) {
            node.suppressed.push(child);
        }
    }

    /// Copy another tree into this one and return the index of its root.
    pub fn graft(&mut self, other: FailureTree) -> u32 {
        let offset = self.nodes.len() as u32;
        self.nodes.extend(other.nodes.into_iter().map(|mut node| {
            node.cause = node.cause.map(|c| c + offset);
            for s in &mut node.suppressed {
                *s += offset;
            }
            node
        }));
        offset
    }

    /// Wrap this tree in a new root whose cause is the current root.
    pub fn wrap(self, kind: FailureKind, message: impl Into<String>) -> Self {
        let mut outer = Self::new(kind, message);
        let inner = outer.graft(self);
        outer.set_cause(0, inner);
        outer
    }

    /// Messages along the cause chain starting at the root.
    pub fn cause_chain(&self) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = Some(0u32);
        while let Some(idx) = current {
            let Some(node) = self.node(idx) else { break };
            chain.push(node.message.as_str());
            current = node.cause;
            if chain.len() > self.nodes.len() {
                break;
            }
        }
        chain
    }
}

impl fmt::Display for FailureTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause_chain().join(": caused by: "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("invocation failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("division by zero")
        }
    }

    impl Error for Inner {}

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_from_error_follows_sources() {
        let tree = FailureTree::from_error(FailureKind::Script, &Outer(Inner));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.cause_chain(), ["invocation failed", "division by zero"]);
    }

    #[test]
    fn test_wrap_rebases_indices() {
        let mut inner = FailureTree::new(FailureKind::Wrapper, "benchmark failed");
        let real = inner.push(FailureKind::Script, "boom");
        inner.add_suppressed(0, real);

        let outer = inner.wrap(FailureKind::Wrapper, "fork 1 failed");
        let root = outer.root();
        let worker = outer.node(root.cause.unwrap()).unwrap();
        assert_eq!(worker.message, "benchmark failed");
        let suppressed = outer.node(worker.suppressed[0]).unwrap();
        assert_eq!(suppressed.message, "boom");
    }

    #[test]
    fn test_display_joins_chain() {
        let tree = FailureTree::new(FailureKind::Script, "b").wrap(FailureKind::Wrapper, "a");
        assert_eq!(tree.to_string(), "a: caused by: b");
    }
}
