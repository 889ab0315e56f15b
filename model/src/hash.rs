use std::fmt;
use std::str::FromStr;

use hashing::Fingerprint;
use serde::de::{Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha256Digest, Sha256};

/// The identity of an immutable blob: the lowercase hex sha256 of its bytes.
///
/// `Hash` is a thin newtype over [`hashing::Fingerprint`] rather than
/// [`hashing::Digest`]: object identity in this model never needs the
/// plaintext length alongside it, so there is no reason to carry one.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Hash(Fingerprint);

impl Hash {
    pub fn of_bytes(bytes: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Hash(Fingerprint::from_bytes(hasher.finalize()))
    }

    pub fn from_hex(s: &str) -> Result<Hash, String> {
        Fingerprint::from_hex_string(s).map(Hash)
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn as_fingerprint(&self) -> Fingerprint {
        self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash<{}>", self.0)
    }
}

impl FromStr for Hash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HashVisitor;

        impl Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a lowercase hex sha256 string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Hash::from_hex(v).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}

/// Computes the deterministic cache-key digest over an ordered list of input
/// hashes: sha256 over their concatenated hex bytes, separated so that e.g.
/// `[ab, c]` and `[a, bc]` never collide.
pub fn digest_hashes<'a>(hashes: impl IntoIterator<Item = &'a Hash>) -> Hash {
    let mut hasher = Sha256::new();
    for hash in hashes {
        hasher.update(hash.to_hex().as_bytes());
        hasher.update(b"\0");
    }
    Hash(Fingerprint::from_bytes(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let h = Hash::of_bytes(b"hello world");
        let s = h.to_hex();
        assert_eq!(s.len(), 64);
        assert_eq!(Hash::from_hex(&s).unwrap(), h);
    }

    #[test]
    fn identical_bytes_hash_identically() {
        assert_eq!(Hash::of_bytes(b"abc"), Hash::of_bytes(b"abc"));
        assert_ne!(Hash::of_bytes(b"abc"), Hash::of_bytes(b"abd"));
    }

    #[test]
    fn digest_hashes_is_order_sensitive() {
        let a = Hash::of_bytes(b"a");
        let b = Hash::of_bytes(b"b");
        assert_ne!(digest_hashes([&a, &b]), digest_hashes([&b, &a]));
        assert_eq!(digest_hashes([&a, &b]), digest_hashes([&a, &b]));
    }

    #[test]
    fn serializes_as_hex_string() {
        let h = Hash::of_bytes(b"abc");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
