//! Arena-backed namespace tree
//!
//! Folders and files share one attribute record and differ only in their
//! payload, so consumers match on [`NodeKind`] instead of probing types.
//! Nodes live in a slot arena and refer to each other by [`NodeId`]; a
//! folder owns the ordered ids of its children (most recently created
//! first) and each node carries its parent id, none for the root.

use crate::allocator::Locator;
use chrono::Utc;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Current wall-clock time as Unix epoch seconds.
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// Three-bit permission set: read=4, write=2, execute=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u8);

impl Mode {
    pub const READ: u8 = 0o4;
    pub const WRITE: u8 = 0o2;
    pub const EXEC: u8 = 0o1;

    /// Build from raw bits; anything above the low three bits is masked off.
    pub fn new(bits: u8) -> Self {
        Mode(bits & 0o7)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn can_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    pub fn can_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    pub fn can_exec(self) -> bool {
        self.0 & Self::EXEC != 0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.can_read() { 'r' } else { '-' },
            if self.can_write() { 'w' } else { '-' },
            if self.can_exec() { 'x' } else { '-' },
        )
    }
}

/// What kind of entry a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Folder => f.write_str("folder"),
        }
    }
}

/// Handle to a node slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Attributes shared by files and folders.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub name: String,
    /// Creation time, Unix epoch seconds.
    pub ctime: i64,
    /// Last modification time, Unix epoch seconds.
    pub mtime: i64,
    pub mode: Mode,
    pub parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    File {
        /// Logical content length in bytes, always at least 1.
        size: usize,
        locator: Locator,
    },
    Folder {
        /// Child ids, most recently created first.
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub meta: NodeMeta,
    pub kind: NodeKind,
}

impl Node {
    pub fn file(name: String, ctime: i64, mtime: i64, mode: Mode, size: usize, locator: Locator) -> Self {
        Node {
            meta: NodeMeta {
                name,
                ctime,
                mtime,
                mode,
                parent: None,
            },
            kind: NodeKind::File { size, locator },
        }
    }

    pub fn folder(name: String, ctime: i64, mtime: i64, mode: Mode) -> Self {
        Node {
            meta: NodeMeta {
                name,
                ctime,
                mtime,
                mode,
                parent: None,
            },
            kind: NodeKind::Folder {
                children: Vec::new(),
            },
        }
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::File { .. } => EntryKind::File,
            NodeKind::Folder { .. } => EntryKind::Folder,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }
}

/// Slot arena owning every node of one simulator.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Remove a node, returning its slot to the free list.
    pub fn remove(&mut self, id: NodeId) -> Node {
        let node = self.slots[id.0].take().expect("removing a dead node id");
        self.free.push(id.0);
        node
    }

    /// Child ids of `id`, empty for a file.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self[id].kind {
            NodeKind::Folder { children } => children,
            NodeKind::File { .. } => &[],
        }
    }

    /// Resolve a child of `folder` by exact name.
    pub fn find_child(&self, folder: NodeId, name: &str) -> Option<NodeId> {
        self.children(folder)
            .iter()
            .copied()
            .find(|&cid| self[cid].meta.name == name)
    }

    /// Attach `child` as the most recent child of `parent`.
    pub fn attach_first(&mut self, parent: NodeId, child: NodeId) {
        self[child].meta.parent = Some(parent);
        match &mut self[parent].kind {
            NodeKind::Folder { children } => children.insert(0, child),
            NodeKind::File { .. } => unreachable!("files own no children"),
        }
    }

    /// Attach `child` as the oldest child of `parent` (rebuild order).
    pub fn attach_last(&mut self, parent: NodeId, child: NodeId) {
        self[child].meta.parent = Some(parent);
        match &mut self[parent].kind {
            NodeKind::Folder { children } => children.push(child),
            NodeKind::File { .. } => unreachable!("files own no children"),
        }
    }

    /// Unlink `child` from `parent` without removing it from the arena.
    pub fn detach(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Folder { children } = &mut self[parent].kind {
            children.retain(|&cid| cid != child);
        }
        self[child].meta.parent = None;
    }

    /// Ids of the subtree rooted at `id`, children before parents, with
    /// `id` itself last. Teardown walks this list front to back.
    pub fn descendants_postorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.postorder_into(id, &mut out);
        out
    }

    fn postorder_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &cid in self.children(id) {
            self.postorder_into(cid, out);
        }
        out.push(id);
    }

    /// Total logical bytes of every file under `id`, recursively.
    pub fn recursive_size(&self, id: NodeId) -> usize {
        match &self[id].kind {
            NodeKind::File { size, .. } => *size,
            NodeKind::Folder { children } => children
                .iter()
                .map(|&cid| self.recursive_size(cid))
                .sum(),
        }
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.slots[id.0].as_ref().expect("stale node id")
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0].as_mut().expect("stale node id")
    }
}
