//! Encrypted virtual container.
//!
//! A single backing file holds a hierarchical directory/file tree together
//! with the encrypted payload bytes of every stored file. A user password
//! wraps a per-container random key; that internal key enciphers the tree
//! snapshot and all file payloads.
//!
//! # Architecture
//!
//! ```text
//! Payload → per-sector AES blocks → sector region
//! Tree    → versioned codec → encrypted tree blob (rewritten on save)
//! ```
//!
//! - [`cipher`]: block cipher capability with the container's bespoke
//!   key-length adaptation
//! - [`sector`]: fixed-size sector allocator with free-list reuse
//! - [`tree`]: arena-based directory/file hierarchy and its byte codec
//! - [`container`]: backing file, header layout, two-tier keys, lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use secdir::cipher::AesCipher;
//! use secdir::SecureContainer;
//! use std::path::Path;
//!
//! let path = Path::new("./archive.secd");
//! let mut container =
//!     SecureContainer::create(path, Box::new(AesCipher::new()), "password").unwrap();
//!
//! let data = b"hidden data";
//! container
//!     .add_file("secret.txt", &mut &data[..], data.len() as u64)
//!     .unwrap();
//! container.save().unwrap();
//!
//! let file = container.find_file("S/secret.txt").unwrap();
//! let mut output = Vec::new();
//! container.load_file(file, &mut output).unwrap();
//! assert_eq!(output, data);
//! ```

pub mod cipher;
pub mod config;
pub mod container;
pub mod error;
pub mod sector;
pub mod tree;

pub use container::SecureContainer;
pub use error::{Error, Result};
