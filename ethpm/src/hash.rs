//! # Content Hashes
//!
//! Pure digest functions for the addressing schemes a package can be
//! fetched from.
//!
//! ## Schemes
//!
//! | Scheme       | Digest                                  | Rendering        |
//! |--------------|-----------------------------------------|------------------|
//! | `ipfs://`    | sha2-256 over a dag-pb/UnixFS file node | base58 multihash |
//! | GitHub blob  | sha1 over `"blob " + len + NUL + data`  | 40 hex chars     |
//!
//! ## IPFS Addresses
//!
//! ```text
//! content ──> UnixFS{Type: File, Data, filesize} ──> PBNode{Data}
//!                                                       │
//!                                                   sha2-256
//!                                                       │
//!                             base58( 0x12 0x20 || digest ) = Qm...
//! ```
//!
//! Only single-block files are addressed locally. Content larger than one
//! chunk is split into a DAG by IPFS and its root cannot be recomputed from a
//! single node, so it is reported as [`HashError::ContentTooLarge`].

use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default IPFS chunker size; files up to this size are a single block.
pub const IPFS_CHUNK_SIZE: usize = 262_144;

/// Multihash code for sha2-256.
const SHA2_256_CODE: u8 = 0x12;

/// Multihash digest length for sha2-256.
const SHA2_256_LENGTH: u8 = 0x20;

/// UnixFS `Data.Type` value for files.
const UNIXFS_FILE: u64 = 2;

/// Errors produced while computing or checking a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("content of {size} bytes exceeds the single-block limit of {limit} bytes")]
    ContentTooLarge { size: usize, limit: usize },

    #[error("IPFS hash mismatch: expected {expected}, computed {actual}")]
    IpfsMismatch { expected: String, actual: String },

    #[error("git blob hash mismatch: expected {expected}, computed {actual}")]
    BlobMismatch { expected: String, actual: String },
}

/// Compute the CIDv0 (`Qm...`) IPFS address of `content`.
pub fn ipfs_hash(content: &[u8]) -> Result<String, HashError> {
    if content.len() > IPFS_CHUNK_SIZE {
        return Err(HashError::ContentTooLarge {
            size: content.len(),
            limit: IPFS_CHUNK_SIZE,
        });
    }

    let node = unixfs_file_node(content);
    let digest = Sha256::digest(&node);

    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.push(SHA2_256_CODE);
    multihash.push(SHA2_256_LENGTH);
    multihash.extend_from_slice(&digest);

    Ok(base58_encode(&multihash))
}

/// Check that `content` hashes to the IPFS address `expected`.
pub fn verify_ipfs_hash(content: &[u8], expected: &str) -> Result<(), HashError> {
    let actual = ipfs_hash(content)?;
    if actual != expected {
        return Err(HashError::IpfsMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Compute the git blob id (lowercase hex sha1) of `content`.
pub fn git_blob_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(b"blob ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Check that `content` hashes to the git blob id `expected`.
///
/// The comparison ignores hex case.
pub fn verify_git_blob_hash(content: &[u8], expected: &str) -> Result<(), HashError> {
    let actual = git_blob_hash(content);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(HashError::BlobMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Serialize a single-block UnixFS file wrapped in a dag-pb node.
fn unixfs_file_node(content: &[u8]) -> Vec<u8> {
    // UnixFS Data message: Type (1), Data (2), filesize (3).
    let mut unixfs = Vec::with_capacity(content.len() + 16);
    unixfs.push(0x08);
    write_varint(&mut unixfs, UNIXFS_FILE);
    if !content.is_empty() {
        unixfs.push(0x12);
        write_varint(&mut unixfs, content.len() as u64);
        unixfs.extend_from_slice(content);
    }
    unixfs.push(0x18);
    write_varint(&mut unixfs, content.len() as u64);

    // PBNode message: Data (1), no links.
    let mut node = Vec::with_capacity(unixfs.len() + 8);
    node.push(0x0a);
    write_varint(&mut node, unixfs.len() as u64);
    node.extend_from_slice(&unixfs);
    node
}

/// Protobuf base-128 varint.
fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Encode bytes with the bitcoin base58 alphabet.
pub(crate) fn base58_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    let zeros = input.iter().take_while(|&&b| b == 0).count();

    // Little-endian base58 digits.
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for &byte in &input[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut output = String::with_capacity(zeros + digits.len());
    output.extend(std::iter::repeat('1').take(zeros));
    output.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipfs_hash_empty_file() {
        assert_eq!(
            ipfs_hash(b"").unwrap(),
            "QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH"
        );
    }

    #[test]
    fn test_ipfs_hash_small_file() {
        assert_eq!(
            ipfs_hash(b"hello world\n").unwrap(),
            "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o"
        );
    }

    #[test]
    fn test_ipfs_hash_rejects_multi_block_content() {
        let content = vec![0u8; IPFS_CHUNK_SIZE + 1];
        assert!(matches!(
            ipfs_hash(&content),
            Err(HashError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_verify_ipfs_hash() {
        assert!(verify_ipfs_hash(b"hello world\n", "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o").is_ok());

        let err = verify_ipfs_hash(b"hello world", "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o")
            .unwrap_err();
        assert!(matches!(err, HashError::IpfsMismatch { .. }));
    }

    #[test]
    fn test_git_blob_hash() {
        assert_eq!(git_blob_hash(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        assert_eq!(
            git_blob_hash(b"hello world\n"),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
    }

    #[test]
    fn test_verify_git_blob_hash_ignores_case() {
        assert!(verify_git_blob_hash(b"", "E69DE29BB2D1D6434B8B29AE775AD8C2E48C5391").is_ok());
        assert!(matches!(
            verify_git_blob_hash(b"x", "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
            Err(HashError::BlobMismatch { .. })
        ));
    }

    #[test]
    fn test_base58_encode() {
        assert_eq!(base58_encode(b""), "");
        assert_eq!(base58_encode(&[0, 0, 1]), "112");
        assert_eq!(base58_encode(b"hello world"), "StV1DL6CwTryKyV");
    }

    #[test]
    fn test_varint_multi_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
    }
}
