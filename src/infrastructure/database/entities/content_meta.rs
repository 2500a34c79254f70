//! Interned content identity entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_meta")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub content_uid: i64,
    pub size_bytes: i64,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
