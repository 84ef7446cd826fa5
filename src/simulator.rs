//! Simulator facade
//!
//! Single entry point over the namespace tree and the segment pool. Every
//! interactive operation runs the same sequence: permission check, tree
//! lookup, pool call, timestamp update. Each instance owns its own pool
//! and tree, so staging a second simulator (for an import, say) can never
//! touch the first one's allocations.

use crate::allocator::{Locator, SegmentPool, Strategy};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::save;
use crate::tree::{now, EntryKind, Mode, Node, NodeArena, NodeId, NodeKind};
use tracing::warn;

/// One row of an `ls` listing.
#[derive(Debug, Clone)]
pub struct LsEntry {
    pub kind: EntryKind,
    pub mode: Mode,
    pub name: String,
    pub ctime: i64,
    pub mtime: i64,
}

/// Result of listing the current folder.
#[derive(Debug, Clone)]
pub struct FolderListing {
    /// Recursive logical size of the current folder's contents.
    pub total_size: usize,
    pub entries: Vec<LsEntry>,
}

#[derive(Debug)]
pub struct Simulator {
    config: SimConfig,
    pool: SegmentPool,
    arena: NodeArena,
    root: NodeId,
    cwd: NodeId,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        let pool = SegmentPool::new(config.capacity, config.max_segments, config.strategy);
        let mut arena = NodeArena::new();
        let t = now();
        let root = arena.insert(Node::folder(String::new(), t, t, Mode::new(0o7)));
        Simulator {
            config,
            pool,
            arena,
            root,
            cwd: root,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    pub fn strategy(&self) -> Strategy {
        self.pool.strategy()
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.pool.set_strategy(strategy);
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn cwd_id(&self) -> NodeId {
        self.cwd
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.arena.children(id)
    }

    /// Raw content bytes of a file node.
    pub fn content(&self, id: NodeId) -> Result<&[u8]> {
        match self.arena[id].kind {
            NodeKind::File { size, locator } => self.pool.read(locator, size),
            NodeKind::Folder { .. } => Err(SimError::TypeMismatch {
                name: self.arena[id].meta.name.clone(),
                expected: EntryKind::File,
                found: EntryKind::Folder,
            }),
        }
    }

    // -- interactive operations (permission-checked) -----------------------

    /// Create an empty file in the current folder.
    pub fn create(&mut self, name: &str) -> Result<()> {
        self.require_cwd_write()?;
        let name = self.checked_name(name)?;
        if self.arena.find_child(self.cwd, &name).is_some() {
            return Err(SimError::NameConflict(name));
        }
        let locator = self.pool.apply(1)?;
        self.pool.write(locator, &[0])?;
        let t = now();
        let node = Node::file(name, t, t, Mode::new(self.config.default_mode), 1, locator);
        let id = self.arena.insert(node);
        self.arena.attach_first(self.cwd, id);
        self.arena[self.cwd].meta.mtime = t;
        Ok(())
    }

    /// Create an empty folder in the current folder.
    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        self.require_cwd_write()?;
        let name = self.checked_name(name)?;
        if self.arena.find_child(self.cwd, &name).is_some() {
            return Err(SimError::NameConflict(name));
        }
        let t = now();
        let node = Node::folder(name, t, t, Mode::new(self.config.default_mode));
        let id = self.arena.insert(node);
        self.arena.attach_first(self.cwd, id);
        self.arena[self.cwd].meta.mtime = t;
        Ok(())
    }

    /// Replace a file's content. On `OutOfSpace` the previous content is
    /// restored before the error surfaces; the file may move in the pool
    /// but its bytes do not change.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let id = self.expect_file(name)?;
        if !self.arena[id].meta.mode.can_write() {
            return Err(SimError::PermissionDenied);
        }
        let (old_size, old_loc) = file_parts(&self.arena[id]);
        let old = self.pool.read(old_loc, old_size)?.to_vec();
        self.pool.free(old_loc)?;

        let new_size = data.len().max(1);
        let locator = match self.pool.apply(new_size) {
            Ok(l) => l,
            Err(SimError::OutOfSpace) => {
                self.restore_content(id, old_size, &old)?;
                return Err(SimError::OutOfSpace);
            }
            Err(e) => return Err(e),
        };
        if data.is_empty() {
            self.pool.write(locator, &[0])?;
        } else {
            self.pool.write(locator, data)?;
        }
        self.set_file_parts(id, new_size, locator);
        self.touch_file_and_cwd(id);
        Ok(())
    }

    /// Append to a file's content, with the same rollback discipline as
    /// [`write`](Self::write).
    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let id = self.expect_file(name)?;
        if !self.arena[id].meta.mode.can_write() {
            return Err(SimError::PermissionDenied);
        }
        let (old_size, old_loc) = file_parts(&self.arena[id]);
        let mut content = self.pool.read(old_loc, old_size)?.to_vec();
        content.extend_from_slice(data);
        self.pool.free(old_loc)?;

        let locator = match self.pool.apply(content.len()) {
            Ok(l) => l,
            Err(SimError::OutOfSpace) => {
                self.restore_content(id, old_size, &content[..old_size])?;
                return Err(SimError::OutOfSpace);
            }
            Err(e) => return Err(e),
        };
        self.pool.write(locator, &content)?;
        self.set_file_parts(id, content.len(), locator);
        self.touch_file_and_cwd(id);
        Ok(())
    }

    /// Read a file's content.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let id = self.expect_file(name)?;
        if !self.arena[id].meta.mode.can_read() {
            return Err(SimError::PermissionDenied);
        }
        let (size, locator) = file_parts(&self.arena[id]);
        Ok(self.pool.read(locator, size)?.to_vec())
    }

    /// Delete a file, releasing its segment.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.require_cwd_write()?;
        let id = self
            .arena
            .find_child(self.cwd, name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        if self.arena[id].is_folder() {
            return Err(SimError::TypeMismatch {
                name: name.to_string(),
                expected: EntryKind::File,
                found: EntryKind::Folder,
            });
        }
        let (_, locator) = file_parts(&self.arena[id]);
        self.pool.free(locator)?;
        self.arena.detach(self.cwd, id);
        self.arena.remove(id);
        self.arena[self.cwd].meta.mtime = now();
        Ok(())
    }

    /// Delete a folder and everything below it, releasing every descendant
    /// file's segment.
    pub fn deldir(&mut self, name: &str) -> Result<()> {
        self.require_cwd_write()?;
        let id = self
            .arena
            .find_child(self.cwd, name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        if !self.arena[id].is_folder() {
            return Err(SimError::TypeMismatch {
                name: name.to_string(),
                expected: EntryKind::Folder,
                found: EntryKind::File,
            });
        }
        self.arena.detach(self.cwd, id);
        for nid in self.arena.descendants_postorder(id) {
            if let NodeKind::File { locator, .. } = self.arena[nid].kind {
                self.pool.free(locator)?;
            }
            self.arena.remove(nid);
        }
        Ok(())
    }

    /// Copy `src`'s bytes verbatim into a new file `dst`.
    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        self.require_cwd_write()?;
        let src_id = self.expect_file(src)?;
        if !self.arena[src_id].meta.mode.can_read() {
            return Err(SimError::PermissionDenied);
        }
        let dst_name = self.checked_name(dst)?;
        if self.arena.find_child(self.cwd, &dst_name).is_some() {
            return Err(SimError::NameConflict(dst_name));
        }
        let (size, locator) = file_parts(&self.arena[src_id]);
        let content = self.pool.read(locator, size)?.to_vec();
        let new_loc = self.pool.apply(size)?;
        self.pool.write(new_loc, &content)?;
        let t = now();
        let node = Node::file(
            dst_name,
            t,
            t,
            Mode::new(self.config.default_mode),
            size,
            new_loc,
        );
        let id = self.arena.insert(node);
        self.arena.attach_first(self.cwd, id);
        self.arena[self.cwd].meta.mtime = t;
        Ok(())
    }

    /// Relabel a child of the current folder.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.require_cwd_write()?;
        let id = self
            .arena
            .find_child(self.cwd, old)
            .ok_or_else(|| SimError::NotFound(old.to_string()))?;
        let new_name = self.checked_name(new)?;
        if self.arena.find_child(self.cwd, &new_name).is_some() {
            return Err(SimError::NameConflict(new_name));
        }
        let t = now();
        let meta = &mut self.arena[id].meta;
        meta.name = new_name;
        meta.mtime = t;
        self.arena[self.cwd].meta.mtime = t;
        Ok(())
    }

    /// Set a child's permission bits. Deliberately ungated: the simulator
    /// has no caller identity, and this is the only way back once a write
    /// bit has been cleared.
    pub fn chmod(&mut self, name: &str, bits: u8) -> Result<()> {
        let id = self
            .arena
            .find_child(self.cwd, name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        self.arena[id].meta.mode = Mode::new(bits);
        Ok(())
    }

    /// Change the current folder. `.` stays put, `..` moves to the parent
    /// (a no-op at the root), anything else must resolve to a folder with
    /// its execute bit set.
    pub fn cd(&mut self, name: &str) -> Result<()> {
        if name == "." {
            return Ok(());
        }
        if name == ".." {
            if let Some(parent) = self.arena[self.cwd].meta.parent {
                self.cwd = parent;
            }
            return Ok(());
        }
        let id = self.expect_folder(name)?;
        if !self.arena[id].meta.mode.can_exec() {
            return Err(SimError::PermissionDenied);
        }
        self.cwd = id;
        Ok(())
    }

    /// Absolute path of the current folder, with a trailing slash.
    pub fn pwd(&self) -> String {
        let mut parts = Vec::new();
        let mut id = self.cwd;
        while let Some(parent) = self.arena[id].meta.parent {
            parts.push(self.arena[id].meta.name.clone());
            id = parent;
        }
        parts.reverse();
        let mut out = String::from("/");
        for part in &parts {
            out.push_str(part);
            out.push('/');
        }
        out
    }

    /// List the current folder's children in sibling order.
    pub fn ls(&self) -> Result<FolderListing> {
        if !self.arena[self.cwd].meta.mode.can_read() {
            return Err(SimError::PermissionDenied);
        }
        let entries = self
            .arena
            .children(self.cwd)
            .iter()
            .map(|&cid| {
                let node = &self.arena[cid];
                LsEntry {
                    kind: node.entry_kind(),
                    mode: node.meta.mode,
                    name: node.meta.name.clone(),
                    ctime: node.meta.ctime,
                    mtime: node.meta.mtime,
                }
            })
            .collect();
        Ok(FolderListing {
            total_size: self.arena.recursive_size(self.cwd),
            entries,
        })
    }

    // -- raw rebuild primitives (trusted deserialization, unchecked) -------

    /// Overwrite the root's attributes. The root keeps its empty name; a
    /// record that tries to rename it is ignored with a warning.
    pub fn raw_set_root_attrs(&mut self, name: &str, ctime: i64, mtime: i64, mode: u8) {
        if !name.is_empty() {
            warn!(name, "root folder cannot be renamed; keeping empty name");
        }
        let meta = &mut self.arena[self.root].meta;
        meta.ctime = ctime;
        meta.mtime = mtime;
        meta.mode = Mode::new(mode);
    }

    /// Append a folder child with the given attributes and make it the
    /// current folder. Children appended under it keep record order.
    pub fn raw_begin_folder(&mut self, name: &str, ctime: i64, mtime: i64, mode: u8) -> Result<()> {
        let name = self.truncated(name);
        if self.arena.find_child(self.cwd, &name).is_some() {
            return Err(SimError::NameConflict(name));
        }
        let node = Node::folder(name, ctime, mtime, Mode::new(mode));
        let id = self.arena.insert(node);
        self.arena.attach_last(self.cwd, id);
        self.cwd = id;
        Ok(())
    }

    /// Leave the folder opened by [`raw_begin_folder`](Self::raw_begin_folder).
    pub fn raw_end_folder(&mut self) {
        if let Some(parent) = self.arena[self.cwd].meta.parent {
            self.cwd = parent;
        }
    }

    /// Append a fully-specified file child with the given content.
    pub fn raw_add_file(
        &mut self,
        name: &str,
        ctime: i64,
        mtime: i64,
        mode: u8,
        content: &[u8],
    ) -> Result<()> {
        let name = self.truncated(name);
        if self.arena.find_child(self.cwd, &name).is_some() {
            return Err(SimError::NameConflict(name));
        }
        let size = content.len().max(1);
        let locator = self.pool.apply(size)?;
        if content.is_empty() {
            self.pool.write(locator, &[0])?;
        } else {
            self.pool.write(locator, content)?;
        }
        let node = Node::file(name, ctime, mtime, Mode::new(mode), size, locator);
        let id = self.arena.insert(node);
        self.arena.attach_last(self.cwd, id);
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn require_cwd_write(&self) -> Result<()> {
        if self.arena[self.cwd].meta.mode.can_write() {
            Ok(())
        } else {
            Err(SimError::PermissionDenied)
        }
    }

    fn expect_file(&self, name: &str) -> Result<NodeId> {
        let id = self
            .arena
            .find_child(self.cwd, name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        match self.arena[id].kind {
            NodeKind::File { .. } => Ok(id),
            NodeKind::Folder { .. } => Err(SimError::TypeMismatch {
                name: name.to_string(),
                expected: EntryKind::File,
                found: EntryKind::Folder,
            }),
        }
    }

    fn expect_folder(&self, name: &str) -> Result<NodeId> {
        let id = self
            .arena
            .find_child(self.cwd, name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        match self.arena[id].kind {
            NodeKind::Folder { .. } => Ok(id),
            NodeKind::File { .. } => Err(SimError::TypeMismatch {
                name: name.to_string(),
                expected: EntryKind::Folder,
                found: EntryKind::File,
            }),
        }
    }

    /// Reject empty names and reserved bytes, then bound the length.
    fn checked_name(&self, name: &str) -> Result<String> {
        if name.is_empty() || name.bytes().any(save::is_reserved) {
            return Err(SimError::InvalidName(name.to_string()));
        }
        Ok(self.truncated(name))
    }

    /// Truncate to `max_name_len` bytes on a char boundary.
    fn truncated(&self, name: &str) -> String {
        let max = self.config.max_name_len;
        if name.len() <= max {
            return name.to_string();
        }
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }

    fn set_file_parts(&mut self, id: NodeId, new_size: usize, new_locator: Locator) {
        if let NodeKind::File { size, locator } = &mut self.arena[id].kind {
            *size = new_size;
            *locator = new_locator;
        }
    }

    fn touch_file_and_cwd(&mut self, id: NodeId) {
        let t = now();
        self.arena[id].meta.mtime = t;
        self.arena[self.cwd].meta.mtime = t;
    }

    /// Re-acquire a segment of the original size and put the original
    /// bytes back. The pool just gave up a segment at least this large,
    /// so the re-acquisition cannot fail.
    fn restore_content(&mut self, id: NodeId, size: usize, bytes: &[u8]) -> Result<()> {
        let locator = self.pool.apply(size)?;
        self.pool.write(locator, bytes)?;
        self.set_file_parts(id, size, locator);
        Ok(())
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(SimConfig::default())
    }
}

fn file_parts(node: &Node) -> (usize, Locator) {
    match node.kind {
        NodeKind::File { size, locator } => (size, locator),
        NodeKind::Folder { .. } => unreachable!("caller checked the node kind"),
    }
}
