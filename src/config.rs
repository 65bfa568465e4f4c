//! Configuration constants for the container format.
//!
//! All offsets and widths here are part of the on-disk layout. Changing any
//! of them breaks compatibility with existing container files.

/// Size of one sector in the data region.
pub const SECTOR_SIZE: usize = 4096;

/// Magic tag at the start of every container file: "SECD".
pub const MAGIC: [u8; 4] = *b"SECD";

/// Width of the NUL-padded cipher identifier field.
pub const CIPHER_ID_SIZE: usize = 4;

/// Size of the per-container internal key.
pub const INTERNAL_KEY_SIZE: usize = 16;

/// Known plaintext used to test a candidate user key without a full open.
/// Exactly one cipher block long.
pub const VALIDATION_SENTINEL: [u8; 16] = *b"decryption_valid";

/// Name and secure path of the root directory node.
pub const ROOT_NAME: &str = "S";

/// Separator between segments of a secure path.
pub const PATH_SEPARATOR: char = '/';

/// Version tag of the tree codec.
pub const TREE_CODEC_VERSION: u16 = 1;

/// Longest secure path the tree codec can frame. Strings carry a u16 length
/// prefix, so anything longer would mis-frame its record on disk.
pub const MAX_PATH_SIZE: usize = u16::MAX as usize;

/// Conventional file extension for container files.
pub const CONTAINER_EXTENSION: &str = ".secd";

/// Byte offsets of the fixed header fields.
pub mod offsets {
    /// 4-byte magic tag.
    pub const MAGIC: u64 = 0;

    /// NUL-padded cipher identifier.
    pub const CIPHER_ID: u64 = 4;

    /// Validation blob, enciphered with the raw user key.
    pub const VALIDATION: u64 = 8;

    /// Internal key, enciphered with the user key.
    pub const INTERNAL_KEY: u64 = 24;

    /// u64 pointer to the tree blob.
    pub const TREE_REF: u64 = 40;

    /// u64 pointer to the allocator metadata blob.
    pub const MEMORY_REF: u64 = 48;

    /// Start of the sector data region.
    pub const DATA: u64 = 56;
}
