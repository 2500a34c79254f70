//! Interned file-content identity

use super::identifier::Uid;
use serde::{Deserialize, Serialize};

/// One interned (size, md5, sha256) triple.
///
/// Two files with identical triples share the same `content_uid`, which lets
/// the planner and the diff equate files by content without touching either
/// tree store. Signature fields stay `None` until an external signature
/// producer fills them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentMeta {
    pub content_uid: Uid,
    pub size_bytes: u64,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

impl ContentMeta {
    pub fn has_signature(&self) -> bool {
        self.md5.is_some() || self.sha256.is_some()
    }

    /// Content equality: equal sizes and an equal, present signature.
    pub fn is_signature_equal(&self, other: &ContentMeta) -> bool {
        if self.size_bytes != other.size_bytes {
            return false;
        }
        match (&self.md5, &other.md5) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.sha256, &other.sha256) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}
