//! Byte codec for the tree blob.
//!
//! Versioned pre-order encoding with explicit counts, little-endian
//! throughout. Parent links are never written; they are rebuilt top-down
//! while decoding. The encoding walks from the root, so nodes unlinked since
//! the last save are not persisted.
//!
//! Directory record:
//! `name, secure_path, u32 file count, file records, u32 child count,
//! child records (recursive)`.
//! File record: `name, secure_path, u64 size, u32 sector count, u32 sectors`.
//! Strings are a u16 length followed by UTF-8 bytes.

use crate::config::TREE_CODEC_VERSION;
use crate::error::{Error, Result};
use crate::tree::{DirId, DirNode, FileNode, Tree};

impl Tree {
    /// Serialize the tree, root first. Deterministic for a given tree.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16(&mut out, TREE_CODEC_VERSION);
        self.encode_dir(super::ROOT_DIR, &mut out);
        out
    }

    /// Rebuild a tree from its serialized form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };

        let version = reader.read_u16()?;
        if version != TREE_CODEC_VERSION {
            return Err(Error::UnsupportedVersion {
                expected: TREE_CODEC_VERSION,
                found: version,
            });
        }

        let mut tree = Tree {
            dirs: Vec::new(),
            files: Vec::new(),
        };
        decode_dir(&mut reader, &mut tree, None)?;

        if reader.pos != bytes.len() {
            return Err(Error::TreeCorrupt("trailing bytes after tree".to_string()));
        }

        Ok(tree)
    }

    fn encode_dir(&self, id: DirId, out: &mut Vec<u8>) {
        let dir = self.dir(id);
        put_str(out, &dir.name);
        put_str(out, &dir.secure_path);

        put_u32(out, dir.files.len() as u32);
        for &file_id in &dir.files {
            let file = self.file(file_id);
            put_str(out, &file.name);
            put_str(out, &file.secure_path);
            put_u64(out, file.size);
            put_u32(out, file.sectors.len() as u32);
            for &sector in &file.sectors {
                put_u32(out, sector);
            }
        }

        put_u32(out, dir.children.len() as u32);
        for &child in &dir.children {
            self.encode_dir(child, out);
        }
    }
}

fn decode_dir(reader: &mut Reader<'_>, tree: &mut Tree, parent: Option<DirId>) -> Result<DirId> {
    let name = reader.read_string()?;
    let secure_path = reader.read_string()?;

    let id = tree.dirs.len();
    tree.dirs.push(DirNode {
        name,
        secure_path,
        parent,
        children: Vec::new(),
        files: Vec::new(),
    });

    let file_count = reader.read_u32()?;
    for _ in 0..file_count {
        let name = reader.read_string()?;
        let secure_path = reader.read_string()?;
        let size = reader.read_u64()?;

        let sector_count = reader.read_u32()? as usize;
        // Counts come from untrusted bytes; never reserve more than the blob
        // could actually hold, or garbage input aborts instead of erroring.
        let mut sectors = Vec::with_capacity(sector_count.min(reader.remaining() / 4));
        for _ in 0..sector_count {
            sectors.push(reader.read_u32()?);
        }

        let file_id = tree.files.len();
        tree.files.push(FileNode {
            name,
            secure_path,
            parent: id,
            size,
            sectors,
        });
        tree.dirs[id].files.push(file_id);
    }

    let child_count = reader.read_u32()?;
    for _ in 0..child_count {
        let child = decode_dir(reader, tree, Some(id))?;
        tree.dirs[id].children.push(child);
    }

    Ok(id)
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize, "string exceeds codec frame");
    put_u16(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::TreeCorrupt("unexpected end of tree blob".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::TreeCorrupt("invalid UTF-8 in node name".to_string()))
    }
}
