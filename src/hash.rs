//! Object ids as they appear on the wire. The gateway never computes hashes itself; it only
//! carries the ids an upstream advertises, so the type is an opaque fixed-width value that
//! can be SHA-1 or SHA-256 wide.

use std::{fmt::Display, str::FromStr};

/// The [`HashKind`] enum represents the hash algorithms a Git repository can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            _ => Err(format!("Invalid hash kind: {s}")),
        }
    }
}

/// A Git object id, either 20 (SHA-1) or 32 (SHA-256) bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectHash {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            ObjectHash::Sha1(bytes) => bytes.as_slice(),
            ObjectHash::Sha256(bytes) => bytes.as_slice(),
        }
    }
}

/// Parses a 40 or 64 character hexadecimal id; the length selects the [`HashKind`].
impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => {
                let mut h = [0u8; 20];
                hex::decode_to_slice(s, &mut h).map_err(|e| e.to_string())?;
                Ok(ObjectHash::Sha1(h))
            }
            64 => {
                let mut h = [0u8; 32];
                hex::decode_to_slice(s, &mut h).map_err(|e| e.to_string())?;
                Ok(ObjectHash::Sha256(h))
            }
            _ => Err(format!("Invalid hash length: {}", s.len())),
        }
    }
}

impl ObjectHash {
    /// returns the kind of hash
    pub fn kind(&self) -> HashKind {
        match self {
            ObjectHash::Sha1(_) => HashKind::Sha1,
            ObjectHash::Sha256(_) => HashKind::Sha256,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::hash::{HashKind, ObjectHash};

    #[test]
    fn test_sha1_from_str() {
        let hash_str = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let hash = ObjectHash::from_str(hash_str).unwrap();
        assert_eq!(hash.kind(), HashKind::Sha1);
        assert_eq!(hash.to_string(), hash_str);
    }

    #[test]
    fn test_sha256_from_str() {
        let hash_str = "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3";
        let hash = ObjectHash::from_str(hash_str).unwrap();
        assert_eq!(hash.kind(), HashKind::Sha256);
        assert_eq!(hash.to_string(), hash_str);
    }

    #[test]
    fn test_uppercase_hex_is_normalized() {
        let hash = ObjectHash::from_str("8AB686EAFEB1F44702738C8B0F24F2567C36DA6D").unwrap();
        assert_eq!(hash.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    #[test]
    fn test_invalid_hashes_rejected() {
        assert!(ObjectHash::from_str("abc").is_err());
        assert!(ObjectHash::from_str("zzb686eafeb1f44702738c8b0f24f2567c36da6d").is_err());
    }

    #[test]
    fn test_hash_kind_from_str() {
        assert_eq!("SHA256".parse::<HashKind>().unwrap(), HashKind::Sha256);
        assert_eq!(HashKind::Sha1.to_string(), "sha1");
        assert!("md5".parse::<HashKind>().is_err());
    }
}
