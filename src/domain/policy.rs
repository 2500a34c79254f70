//! Drag/drop operations and conflict-resolution policies

use serde::{Deserialize, Serialize};
use strum::Display;

/// The gesture the user performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DragOperation {
    Copy,
    Move,
}

/// What to do when a dragged directory collides with an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DirConflictPolicy {
    Skip,
    Replace,
    Rename,
    Merge,
    Prompt,
}

/// What to do when a dragged file collides with an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FileConflictPolicy {
    Skip,
    ReplaceAlways,
    ReplaceIfOlderAndDifferent,
    RenameAlways,
    RenameIfOlderAndDifferent,
    RenameIfDifferent,
    Prompt,
}

/// Whether a MOVE whose destination side was skipped still deletes the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SrcNodeMovePolicy {
    DeleteSrcIfNotSkipped,
    DeleteSrcAlways,
}

impl Default for SrcNodeMovePolicy {
    fn default() -> Self {
        SrcNodeMovePolicy::DeleteSrcIfNotSkipped
    }
}

/// Behavior when a file would replace an existing directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplaceDirWithFilePolicy {
    Fail,
    Prompt,
    FollowFilePolicyForDir,
}

impl Default for ReplaceDirWithFilePolicy {
    fn default() -> Self {
        ReplaceDirWithFilePolicy::Fail
    }
}
