//! Block cipher capability used by the container.
//!
//! The container never chains blocks: every block (and therefore every
//! sector) is enciphered independently under the same derived key material.
//! Identical plaintext blocks produce identical ciphertext. This is a
//! documented property of the container format and has to stay this way for
//! existing files to remain readable.

mod aes;

pub use self::aes::{cast_key, AesCipher};

/// A block cipher as the container consumes it.
///
/// `encrypt`/`decrypt` mutate the region of `buf` starting at `offset` in
/// place; its length must be a multiple of [`min_data_size`](Self::min_data_size).
/// Keys of any non-zero length are accepted and adapted per call, see
/// [`cast_key`].
pub trait BlockCipher {
    /// Natural block size of the cipher in bytes.
    fn min_data_size(&self) -> usize;

    /// Short tag persisted in the container header to select the cipher
    /// again on open. The header field holds at most four bytes; longer
    /// identifiers are truncated when stored.
    fn identifier(&self) -> &'static str;

    /// Encipher `buf[offset..]` in place.
    fn encrypt(&self, buf: &mut [u8], offset: usize, key: &[u8]);

    /// Decipher `buf[offset..]` in place.
    fn decrypt(&self, buf: &mut [u8], offset: usize, key: &[u8]);

    /// Grow `buf` to the next multiple of the block size.
    fn pad(&self, buf: &mut Vec<u8>);
}
