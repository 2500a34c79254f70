//! Tree-store substrate: per-device in-memory trees plus their on-disk
//! subtree indexes.

pub mod index;
pub mod tree_store;

pub use index::{gdrive_index_file_name, local_index_file_name, SubtreeIndex};
pub use tree_store::{TreeStore, TreeStoreError};
