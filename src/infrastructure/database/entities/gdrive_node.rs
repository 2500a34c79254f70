//! Tree-index row shapes for Google Drive nodes
//!
//! GDrive permits multi-parenting, so parent UIDs and the matching path list
//! are stored as delimited text in stable order.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod gdrive_file {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "gdrive_file")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub uid: i64,
        pub goog_id: Option<String>,
        /// Comma-joined parent UIDs, stable order.
        pub parent_uids: String,
        pub name: String,
        /// Newline-joined paths, same order as `parent_uids`.
        pub path_list: String,
        pub content_uid: i64,
        pub trashed: i32,
        pub is_shared: bool,
        pub is_live: bool,
        pub create_ts: i64,
        pub modify_ts: i64,
        pub sync_ts: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod gdrive_folder {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "gdrive_folder")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub uid: i64,
        pub goog_id: Option<String>,
        pub parent_uids: String,
        pub name: String,
        pub path_list: String,
        pub trashed: i32,
        pub is_shared: bool,
        pub is_live: bool,
        pub all_children_fetched: bool,
        pub sync_ts: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Join/split helpers for the delimited columns.
pub fn join_uids(uids: &[crate::domain::Uid]) -> String {
    uids.iter()
        .map(|u| u.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_uids(raw: &str) -> Vec<crate::domain::Uid> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u64>().ok())
        .map(crate::domain::Uid)
        .collect()
}

pub fn join_paths(paths: &[String]) -> String {
    paths.join("\n")
}

pub fn split_paths(raw: &str) -> Vec<String> {
    raw.split('\n')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
