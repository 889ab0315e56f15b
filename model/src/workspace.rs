use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// The mutable binding of a package plus its live data tree.
///
/// An empty value (no `WorkspaceState` ref present) means the workspace was
/// created but never deployed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub package_name: String,
    pub package_version: String,
    pub package_hash: Hash,
    pub root_hash: Hash,
    pub deployed_at: SystemTime,
    pub root_updated_at: SystemTime,
}

impl WorkspaceState {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("WorkspaceState serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<WorkspaceState, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed workspace state: {e}"))
    }

    /// Returns a copy of this state with `root_hash` swapped in and
    /// `root_updated_at` bumped, as produced by a copy-path-to-root write.
    pub fn with_root(&self, root_hash: Hash, at: SystemTime) -> WorkspaceState {
        WorkspaceState {
            root_hash,
            root_updated_at: at,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let now = SystemTime::now();
        let s = WorkspaceState {
            package_name: "demo".to_string(),
            package_version: "1.0.0".to_string(),
            package_hash: Hash::of_bytes(b"pkg"),
            root_hash: Hash::of_bytes(b"root"),
            deployed_at: now,
            root_updated_at: now,
        };
        assert_eq!(WorkspaceState::decode(&s.encode()).unwrap(), s);
    }

    #[test]
    fn with_root_only_changes_root_fields() {
        let now = SystemTime::now();
        let s = WorkspaceState {
            package_name: "demo".to_string(),
            package_version: "1.0.0".to_string(),
            package_hash: Hash::of_bytes(b"pkg"),
            root_hash: Hash::of_bytes(b"root"),
            deployed_at: now,
            root_updated_at: now,
        };
        let later = now + std::time::Duration::from_secs(1);
        let s2 = s.with_root(Hash::of_bytes(b"root2"), later);
        assert_eq!(s2.package_name, s.package_name);
        assert_eq!(s2.root_hash, Hash::of_bytes(b"root2"));
        assert_eq!(s2.root_updated_at, later);
    }
}
