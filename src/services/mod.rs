//! External back-end contracts

pub mod gdrive;

pub use gdrive::{DriveClient, DriveError, DriveNodeMeta};
