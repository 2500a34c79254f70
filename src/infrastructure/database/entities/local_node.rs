//! Tree-index row shapes for local nodes
//!
//! One pair of tables per subtree index file.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod local_file {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "local_file")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub uid: i64,
        pub parent_uid: i64,
        pub name: String,
        pub full_path: String,
        pub content_uid: i64,
        pub trashed: i32,
        pub is_shared: bool,
        pub is_live: bool,
        pub create_ts: i64,
        pub modify_ts: i64,
        pub change_ts: i64,
        pub sync_ts: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod local_dir {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "local_dir")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub uid: i64,
        /// 0 when the row is the subtree root.
        pub parent_uid: i64,
        pub name: String,
        pub full_path: String,
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
