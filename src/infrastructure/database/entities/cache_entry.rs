//! Cache registry catalog entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per cached subtree. `cache_location` is the index file name
/// relative to the instance directory.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cache_registry")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub cache_location: String,
    pub device_uid: i64,
    pub node_uid: i64,
    /// Absolute path of the subtree root.
    pub subtree_root_path: String,
    pub sync_ts: i64,
    pub is_complete: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
