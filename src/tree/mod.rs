//! In-memory directory/file tree.
//!
//! Nodes live in an arena and reference each other by index: parents are
//! non-owning indices, children and files are owned index lists kept in
//! insertion order. Unlinking removes a node from its parent's lists only;
//! the slot stays in the arena until the tree is next decoded from disk,
//! since the codec walks from the root and never persists orphans.

mod codec;

use crate::config::{MAX_PATH_SIZE, PATH_SEPARATOR, ROOT_NAME};
use crate::error::{Error, Result};

/// Index of a directory node in the tree arena.
pub type DirId = usize;

/// Index of a file node in the tree arena.
pub type FileId = usize;

/// Arena index of the root directory.
pub const ROOT_DIR: DirId = 0;

/// A directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    /// Directory name. The root carries the single-character sentinel.
    pub name: String,
    /// Root-relative path, separator-joined, starting with the sentinel.
    pub secure_path: String,
    /// Parent directory; `None` only for the root.
    pub parent: Option<DirId>,
    /// Child directories in insertion order.
    pub children: Vec<DirId>,
    /// Contained files in insertion order.
    pub files: Vec<FileId>,
}

/// A file node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub secure_path: String,
    pub parent: DirId,
    /// Exact original byte length, before sector padding.
    pub size: u64,
    /// Sector indices holding the file's encrypted bytes, in stream order.
    pub sectors: Vec<u32>,
}

/// Directory/file hierarchy of one container.
#[derive(Debug)]
pub struct Tree {
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

impl Tree {
    /// Create a tree holding only the root directory.
    pub fn new() -> Self {
        Self {
            dirs: vec![DirNode {
                name: ROOT_NAME.to_string(),
                secure_path: ROOT_NAME.to_string(),
                parent: None,
                children: Vec::new(),
                files: Vec::new(),
            }],
            files: Vec::new(),
        }
    }

    /// Access a directory node.
    pub fn dir(&self, id: DirId) -> &DirNode {
        &self.dirs[id]
    }

    /// Access a file node.
    pub fn file(&self, id: FileId) -> &FileNode {
        &self.files[id]
    }

    /// Check that `name` is usable for a new entry under `parent`: non-empty,
    /// separator-free, and short enough that the resulting secure path still
    /// fits the codec's string frame.
    pub(crate) fn validate_entry(&self, parent: DirId, name: &str) -> Result<()> {
        validate_name(name)?;

        let path_len = self.dirs[parent].secure_path.len() + 1 + name.len();
        if path_len > MAX_PATH_SIZE {
            return Err(Error::PathTooLong(path_len));
        }

        Ok(())
    }

    /// Create a directory under `parent` and return its id.
    ///
    /// Sibling names are not checked for duplicates; lookups return the
    /// first match.
    pub fn add_directory(&mut self, parent: DirId, name: &str) -> Result<DirId> {
        self.validate_entry(parent, name)?;

        let secure_path = join_path(&self.dirs[parent].secure_path, name);
        let id = self.dirs.len();
        self.dirs.push(DirNode {
            name: name.to_string(),
            secure_path,
            parent: Some(parent),
            children: Vec::new(),
            files: Vec::new(),
        });
        self.dirs[parent].children.push(id);

        Ok(id)
    }

    /// Record a file under `parent` and return its id.
    pub fn add_file(&mut self, parent: DirId, name: &str, size: u64, sectors: Vec<u32>) -> Result<FileId> {
        self.validate_entry(parent, name)?;

        let secure_path = join_path(&self.dirs[parent].secure_path, name);
        let id = self.files.len();
        self.files.push(FileNode {
            name: name.to_string(),
            secure_path,
            parent,
            size,
            sectors,
        });
        self.dirs[parent].files.push(id);

        Ok(id)
    }

    /// First child of `dir` with the given name.
    pub fn child_named(&self, dir: DirId, name: &str) -> Option<DirId> {
        self.dirs[dir]
            .children
            .iter()
            .copied()
            .find(|&c| self.dirs[c].name == name)
    }

    /// Child of `dir` at the given position in insertion order.
    pub fn child_at(&self, dir: DirId, index: usize) -> Option<DirId> {
        self.dirs[dir].children.get(index).copied()
    }

    /// Parent of `dir`; `None` for the root.
    pub fn parent(&self, dir: DirId) -> Option<DirId> {
        self.dirs[dir].parent
    }

    /// First file in `dir` with the given name.
    pub fn file_named(&self, dir: DirId, name: &str) -> Option<FileId> {
        self.dirs[dir]
            .files
            .iter()
            .copied()
            .find(|&f| self.files[f].name == name)
    }

    /// Resolve a separator-joined secure path to a directory.
    ///
    /// The first segment must be the root sentinel. Each following segment
    /// is matched against children by name, first match wins.
    pub fn find_directory(&self, secure_path: &str) -> Option<DirId> {
        let mut segments = secure_path.split(PATH_SEPARATOR);

        if segments.next() != Some(ROOT_NAME) {
            return None;
        }

        let mut current = ROOT_DIR;
        for segment in segments {
            current = self.child_named(current, segment)?;
        }

        Some(current)
    }

    /// Resolve a separator-joined secure path to a file.
    pub fn find_file(&self, secure_path: &str) -> Option<FileId> {
        let (dir_path, name) = secure_path.rsplit_once(PATH_SEPARATOR)?;
        let dir = self.find_directory(dir_path)?;
        self.file_named(dir, name)
    }

    /// Unlink a file from its parent and return the sectors it held.
    pub fn unlink_file(&mut self, id: FileId) -> Vec<u32> {
        let parent = self.files[id].parent;
        self.dirs[parent].files.retain(|&f| f != id);
        std::mem::take(&mut self.files[id].sectors)
    }

    /// Unlink a directory subtree from its parent and return the sector
    /// sets of every file it contained, deepest entries included.
    ///
    /// Returns `None` when asked to remove the root.
    pub fn unlink_directory(&mut self, id: DirId) -> Option<Vec<Vec<u32>>> {
        let parent = self.dirs[id].parent?;
        self.dirs[parent].children.retain(|&c| c != id);

        let mut sector_sets = Vec::new();
        self.collect_subtree_sectors(id, &mut sector_sets);
        Some(sector_sets)
    }

    fn collect_subtree_sectors(&mut self, dir: DirId, out: &mut Vec<Vec<u32>>) {
        let files = std::mem::take(&mut self.dirs[dir].files);
        for file in files {
            out.push(std::mem::take(&mut self.files[file].sectors));
        }

        let children = std::mem::take(&mut self.dirs[dir].children);
        for child in children {
            self.collect_subtree_sectors(child, out);
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn join_path(parent: &str, name: &str) -> String {
    format!("{parent}{PATH_SEPARATOR}{name}")
}
