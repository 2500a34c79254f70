//! Operation ledger row shapes

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod op_pending {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "op_pending")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub op_uid: i64,
        pub batch_uid: i64,
        pub op_type: i32,
        pub status: i32,
        pub src_node_uid: i64,
        pub dst_node_uid: Option<i64>,
        pub create_ts: i64,
        pub detail_msg: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod op_completed {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "op_completed")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub op_uid: i64,
        pub batch_uid: i64,
        pub op_type: i32,
        pub status: i32,
        pub src_node_uid: i64,
        pub dst_node_uid: Option<i64>,
        pub create_ts: i64,
        pub detail_msg: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
