//! Recursive directory aggregates

use serde::{Deserialize, Serialize};

/// Totals for a directory's whole subtree. Computed lazily by the tree store
/// and cached on the node until the next mutation under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirStats {
    pub file_count: u64,
    pub dir_count: u64,
    pub size_bytes: u64,
    pub trashed_file_count: u64,
    pub trashed_dir_count: u64,
    pub trashed_bytes: u64,
}

impl DirStats {
    pub fn add_file(&mut self, size_bytes: u64, trashed: bool) {
        if trashed {
            self.trashed_file_count += 1;
            self.trashed_bytes += size_bytes;
        } else {
            self.file_count += 1;
            self.size_bytes += size_bytes;
        }
    }

    pub fn add_dir(&mut self, trashed: bool) {
        if trashed {
            self.trashed_dir_count += 1;
        } else {
            self.dir_count += 1;
        }
    }
}
