//! Hashing - manifest and archive digests
//!
//! The pass manifest lists a SHA-1 digest per archive entry, as the wallet
//! format requires. SHA-256 is used for the digests recorded in run summaries.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Compute SHA-1 hash of bytes, return hex string
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Manifest document: entry name -> SHA-1, keys sorted.
pub fn manifest_json<'a, I>(entries: I) -> Result<Vec<u8>, serde_json::Error>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let manifest: BTreeMap<&str, String> = entries
        .into_iter()
        .map(|(name, data)| (name, sha1_hex(data)))
        .collect();
    serde_json::to_vec(&manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_manifest_sorted() {
        let entries: Vec<(&str, &[u8])> = vec![("pass.json", &b"{}"[..]), ("icon.png", &b"png"[..])];
        let manifest = String::from_utf8(manifest_json(entries).unwrap()).unwrap();
        let icon_at = manifest.find("icon.png").unwrap();
        let pass_at = manifest.find("pass.json").unwrap();
        assert!(icon_at < pass_at);
        assert!(manifest.contains(&sha1_hex(b"{}")));
    }
}
