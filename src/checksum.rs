//! Deterministic hashing for delta payloads and world state.
//!
//! The algorithm is a deployment-wide setting: producers and the server
//! must agree on it, it is not carried per message.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Serialised lower-case. Config files, env vars and CLI flags all parse
/// through [`FromStr`](std::str::FromStr), so `SHA256` and `sha-256` work
/// everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl ChecksumAlgorithm {
    /// Lower-case hex digest of `bytes`.
    pub fn digest(self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
        }
    }

    /// Serialise `value` as compact JSON and hash it.
    ///
    /// `serde_json` object maps are ordered by key, so two values that
    /// compare equal always produce the same digest.
    pub fn digest_json<T: Serialize + ?Sized>(
        self,
        value: &T,
    ) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.digest(&bytes))
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            other => Err(format!("unsupported checksum algorithm '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for ChecksumAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
