//! Container orchestrator: backing file, header layout, two-tier keys and
//! the create/open/save lifecycle.
//!
//! Two-tier key scheme: a random 16-byte internal key enciphers the tree
//! blob and every file payload; the internal key itself is stored wrapped
//! under the user key. Unwrapping carries no integrity check — a wrong user
//! key yields garbage key material, not an error. [`SecureContainer::validate_key`]
//! is the only way to test a candidate key beforehand.
//!
//! All operations are synchronous and reposition the backing file before
//! touching it; a container instance must not be shared across threads
//! without external serialization.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::BlockCipher;
use crate::config::{
    offsets, CIPHER_ID_SIZE, INTERNAL_KEY_SIZE, MAGIC, SECTOR_SIZE, VALIDATION_SENTINEL,
};
use crate::error::{Error, Result};
use crate::sector::SectorAllocator;
use crate::tree::{DirId, FileId, Tree, ROOT_DIR};

/// An open encrypted container.
///
/// Created by [`create`](Self::create) or [`open`](Self::open). Tree and
/// allocator mutations happen purely in memory; [`save`](Self::save) is the
/// only point at which the metadata trailer is rewritten. File payload
/// sectors are written as files are added and never touched by `save`.
pub struct SecureContainer {
    file: File,
    cipher: Box<dyn BlockCipher>,
    user_key: Zeroizing<Vec<u8>>,
    internal_key: Zeroizing<[u8; INTERNAL_KEY_SIZE]>,
    tree: Tree,
    active: DirId,
    alloc: SectorAllocator,
}

impl SecureContainer {
    /// Create a new container file at `path`.
    ///
    /// Writes the fixed header (magic, cipher identifier, validation blob,
    /// wrapped internal key, zeroed blob pointers) and initializes an empty
    /// root. The tree and allocator pointers stay zero until the first
    /// [`save`](Self::save).
    pub fn create(path: &Path, cipher: Box<dyn BlockCipher>, key: &str) -> Result<Self> {
        let user_key = user_key_bytes(key)?;

        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Magic and cipher identifier
        file.seek(SeekFrom::Start(offsets::MAGIC))?;
        file.write_all(&MAGIC)?;
        file.write_all(&fixed_cipher_id(cipher.identifier()))?;

        // Validation blob, enciphered with the raw user key
        let mut validation = VALIDATION_SENTINEL;
        cipher.encrypt(&mut validation, 0, &user_key);
        file.seek(SeekFrom::Start(offsets::VALIDATION))?;
        file.write_all(&validation)?;

        // Random internal key, wrapped under the user key
        let mut internal_key = Zeroizing::new([0u8; INTERNAL_KEY_SIZE]);
        rand::rngs::OsRng.fill_bytes(&mut internal_key[..]);

        let mut wrapped = *internal_key;
        cipher.encrypt(&mut wrapped, 0, &user_key);
        file.seek(SeekFrom::Start(offsets::INTERNAL_KEY))?;
        file.write_all(&wrapped)?;

        // Blob pointers, filled in by the first save
        file.seek(SeekFrom::Start(offsets::TREE_REF))?;
        file.write_all(&0u64.to_le_bytes())?;
        file.write_all(&0u64.to_le_bytes())?;

        debug!(path = %path.display(), "created container");

        Ok(Self {
            file,
            cipher,
            user_key,
            internal_key,
            tree: Tree::new(),
            active: ROOT_DIR,
            alloc: SectorAllocator::new(offsets::DATA),
        })
    }

    /// Open an existing container file.
    ///
    /// The internal key is unwrapped with the supplied key without any
    /// integrity check; with a wrong key the tree blob decodes to garbage
    /// and typically surfaces as a corrupt-tree error. Use
    /// [`validate_key`](Self::validate_key) first to test the key cheaply.
    pub fn open(path: &Path, cipher: Box<dyn BlockCipher>, key: &str) -> Result<Self> {
        let user_key = user_key_bytes(key)?;

        let mut file = File::options().read(true).write(true).open(path)?;

        // Header
        let mut magic = [0u8; 4];
        file.seek(SeekFrom::Start(offsets::MAGIC))?;
        file.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let mut id = [0u8; CIPHER_ID_SIZE];
        file.read_exact(&mut id)?;
        let found = cipher_id_str(&id);
        if found != cipher.identifier() {
            return Err(Error::CipherMismatch {
                expected: cipher.identifier().to_string(),
                found,
            });
        }

        // Internal key
        let mut internal_key = Zeroizing::new([0u8; INTERNAL_KEY_SIZE]);
        file.seek(SeekFrom::Start(offsets::INTERNAL_KEY))?;
        file.read_exact(&mut internal_key[..])?;
        cipher.decrypt(&mut internal_key[..], 0, &user_key);

        // Blob pointers
        file.seek(SeekFrom::Start(offsets::TREE_REF))?;
        let tree_ref = read_u64(&mut file)?;
        let memory_ref = read_u64(&mut file)?;

        // Tree blob: plaintext u32 length, then block-padded ciphertext
        file.seek(SeekFrom::Start(tree_ref))?;
        let tree_len = read_u32(&mut file)? as usize;
        let min = cipher.min_data_size();
        let padded = tree_len.div_ceil(min) * min;

        // A never-saved or corrupt header yields a bogus length; check it
        // against the file before allocating.
        let file_len = file.metadata()?.len();
        if tree_ref + 4 + padded as u64 > file_len {
            return Err(Error::TreeCorrupt(
                "tree blob extends past the end of the file".to_string(),
            ));
        }

        let mut blob = vec![0u8; padded];
        file.read_exact(&mut blob)?;
        cipher.decrypt(&mut blob, 0, &*internal_key);
        blob.truncate(tree_len);
        let tree = Tree::from_bytes(&blob)?;

        // Allocator metadata blob, plaintext
        file.seek(SeekFrom::Start(memory_ref))?;
        let start_index = read_u64(&mut file)?;
        let sector_count = read_u32(&mut file)?;
        let free = read_u32_list(&mut file)?;
        let occupied = read_u32_list(&mut file)?;

        debug!(path = %path.display(), sector_count, "opened container");

        Ok(Self {
            file,
            cipher,
            user_key,
            internal_key,
            tree,
            active: ROOT_DIR,
            alloc: SectorAllocator::from_parts(start_index, sector_count, free, occupied),
        })
    }

    /// Persist the tree snapshot and allocator metadata.
    ///
    /// The whole tree is re-serialized every time. The tree blob lands at
    /// the current end of the sector region, the metadata blob directly
    /// after it, and the file is truncated there. Sector payload bytes
    /// already on disk are never rewritten; freed sectors keep their bytes
    /// until a future write reuses them.
    pub fn save(&mut self) -> Result<()> {
        let tree_ref =
            self.alloc.start_index() + u64::from(self.alloc.sector_count()) * SECTOR_SIZE as u64;

        // Tree blob
        let mut blob = self.tree.to_bytes();
        let tree_len = blob.len() as u32;
        self.cipher.pad(&mut blob);
        self.cipher.encrypt(&mut blob, 0, &*self.internal_key);

        self.file.seek(SeekFrom::Start(offsets::TREE_REF))?;
        self.file.write_all(&tree_ref.to_le_bytes())?;

        self.file.seek(SeekFrom::Start(tree_ref))?;
        self.file.write_all(&tree_len.to_le_bytes())?;
        self.file.write_all(&blob)?;

        // Allocator metadata blob
        let memory_ref = tree_ref + 4 + blob.len() as u64;
        self.file.seek(SeekFrom::Start(offsets::MEMORY_REF))?;
        self.file.write_all(&memory_ref.to_le_bytes())?;

        self.file.seek(SeekFrom::Start(memory_ref))?;
        self.file.write_all(&self.alloc.start_index().to_le_bytes())?;
        self.file.write_all(&self.alloc.sector_count().to_le_bytes())?;
        write_u32_list(&mut self.file, self.alloc.free())?;
        write_u32_list(&mut self.file, self.alloc.occupied())?;

        let end = self.file.stream_position()?;
        self.file.set_len(end)?;
        self.file.sync_all()?;

        debug!(tree_len, sector_count = self.alloc.sector_count(), "saved container");

        Ok(())
    }

    /// Flush and release the backing file.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Test a candidate user key against the container at `path` without
    /// opening it: reads only the validation blob and compares it to the
    /// known sentinel.
    pub fn validate_key(path: &Path, cipher: &dyn BlockCipher, key: &str) -> Result<bool> {
        let user_key = user_key_bytes(key)?;

        let mut file = File::open(path)?;
        let mut blob = [0u8; VALIDATION_SENTINEL.len()];
        file.seek(SeekFrom::Start(offsets::VALIDATION))?;
        file.read_exact(&mut blob)?;

        cipher.decrypt(&mut blob, 0, &user_key);
        Ok(blob == VALIDATION_SENTINEL)
    }

    /// Whether the file at `path` starts with the container magic tag.
    pub fn is_container(path: &Path) -> Result<bool> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        file.seek(SeekFrom::Start(offsets::MAGIC))?;
        file.read_exact(&mut magic)?;
        Ok(magic == MAGIC)
    }

    // --- tree access and navigation ---

    /// The directory/file hierarchy.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The active directory cursor.
    pub fn active_dir(&self) -> DirId {
        self.active
    }

    /// Move the cursor to the child with the given name.
    pub fn move_to_child(&mut self, name: &str) -> bool {
        match self.tree.child_named(self.active, name) {
            Some(child) => {
                self.active = child;
                true
            }
            None => false,
        }
    }

    /// Move the cursor to the child at the given position.
    pub fn move_to_child_at(&mut self, index: usize) -> bool {
        match self.tree.child_at(self.active, index) {
            Some(child) => {
                self.active = child;
                true
            }
            None => false,
        }
    }

    /// Move the cursor to the parent directory.
    pub fn move_to_parent(&mut self) -> bool {
        match self.tree.parent(self.active) {
            Some(parent) => {
                self.active = parent;
                true
            }
            None => false,
        }
    }

    /// Position the cursor at the directory with the given secure path.
    pub fn set_active_dir(&mut self, secure_path: &str) -> bool {
        match self.tree.find_directory(secure_path) {
            Some(dir) => {
                self.active = dir;
                true
            }
            None => false,
        }
    }

    /// Resolve a secure path to a directory.
    pub fn find_directory(&self, secure_path: &str) -> Option<DirId> {
        self.tree.find_directory(secure_path)
    }

    /// Resolve a secure path to a file.
    pub fn find_file(&self, secure_path: &str) -> Option<FileId> {
        self.tree.find_file(secure_path)
    }

    // --- mutation ---

    /// Create a directory under the active directory.
    pub fn add_directory(&mut self, name: &str) -> Result<DirId> {
        self.tree.add_directory(self.active, name)
    }

    /// Store `length` bytes from `source` as a file in the active
    /// directory. The exact pre-padding length is recorded so reads trim
    /// sector rounding precisely.
    pub fn add_file<R: Read>(&mut self, name: &str, source: &mut R, length: u64) -> Result<FileId> {
        self.tree.validate_entry(self.active, name)?;

        let sectors = self.alloc.allocate_bytes(length);
        self.alloc.secure_write(
            &mut self.file,
            source,
            length,
            &sectors,
            self.cipher.as_ref(),
            &*self.internal_key,
        )?;

        self.tree.add_file(self.active, name, length, sectors)
    }

    /// Decrypt a stored file into `output`, yielding exactly its original
    /// bytes.
    pub fn load_file<W: Write>(&mut self, file: FileId, output: &mut W) -> Result<()> {
        let node = self.tree.file(file);
        let length = node.size;
        let sectors = node.sectors.clone();

        self.alloc.secure_read(
            &mut self.file,
            output,
            length,
            &sectors,
            self.cipher.as_ref(),
            &*self.internal_key,
        )
    }

    /// Unlink a file and release its sectors. Returns whether the sectors
    /// were all occupied and are now free again.
    pub fn remove_file(&mut self, file: FileId) -> bool {
        let sectors = self.tree.unlink_file(file);
        self.alloc.deallocate(&sectors)
    }

    /// Unlink a directory subtree and release the sectors of every file it
    /// contained. Returns `false` when asked to delete the root.
    ///
    /// If the cursor was inside the subtree it is reset to the root.
    pub fn delete_directory(&mut self, dir: DirId) -> bool {
        if self.cursor_within(dir) {
            self.active = ROOT_DIR;
        }

        match self.tree.unlink_directory(dir) {
            Some(sector_sets) => {
                for sectors in sector_sets {
                    self.alloc.deallocate(&sectors);
                }
                true
            }
            None => false,
        }
    }

    fn cursor_within(&self, dir: DirId) -> bool {
        let mut current = Some(self.active);
        while let Some(d) = current {
            if d == dir {
                return true;
            }
            current = self.tree.parent(d);
        }
        false
    }
}

impl std::fmt::Debug for SecureContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureContainer")
            .field("cipher", &self.cipher.identifier())
            .field("active", &self.active)
            .field("sector_count", &self.alloc.sector_count())
            .finish_non_exhaustive()
    }
}

fn user_key_bytes(key: &str) -> Result<Zeroizing<Vec<u8>>> {
    if key.is_empty() {
        return Err(Error::InvalidKey);
    }
    Ok(Zeroizing::new(key.as_bytes().to_vec()))
}

// The field is NUL-padded, not NUL-terminated: a full-width identifier uses
// all four bytes and the reader stops at the field boundary.
fn fixed_cipher_id(identifier: &str) -> [u8; CIPHER_ID_SIZE] {
    let mut id = [0u8; CIPHER_ID_SIZE];
    let len = identifier.len().min(CIPHER_ID_SIZE);
    id[..len].copy_from_slice(&identifier.as_bytes()[..len]);
    id
}

fn cipher_id_str(id: &[u8; CIPHER_ID_SIZE]) -> String {
    let end = id.iter().position(|&b| b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}

fn read_u32(file: &mut File) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(file: &mut File) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32_list(file: &mut File) -> Result<Vec<u32>> {
    let len = read_u32(file)? as usize;
    let mut list = Vec::with_capacity(len);
    for _ in 0..len {
        list.push(read_u32(file)?);
    }
    Ok(list)
}

fn write_u32_list(file: &mut File, list: &[u32]) -> Result<()> {
    file.write_all(&(list.len() as u32).to_le_bytes())?;
    for &v in list {
        file.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_id_round_trips_at_every_width() {
        for id in ["A", "AES", "AES2"] {
            let field = fixed_cipher_id(id);
            assert_eq!(cipher_id_str(&field), id);
        }
    }

    #[test]
    fn over_long_cipher_id_is_truncated_to_the_field() {
        let field = fixed_cipher_id("CHACHA");
        assert_eq!(cipher_id_str(&field), "CHAC");
    }
}
