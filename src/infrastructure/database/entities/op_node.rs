//! Node payload companion tables for the op ledger
//!
//! Each ledger row is accompanied by a copy of its src (and dst, if any) node
//! so pending ops can be rehydrated after a restart without consulting the
//! tree caches. One table per (lifecycle, node table, side) combination; all
//! sixteen share the same superset row shape, with the node flavor implied by
//! the table name.

macro_rules! op_node_table {
    ($mod_name:ident, $table:literal) => {
        pub mod $mod_name {
            use sea_orm::entity::prelude::*;
            use serde::{Deserialize, Serialize};

            #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
            #[sea_orm(table_name = $table)]
            pub struct Model {
                #[sea_orm(primary_key, auto_increment = false)]
                pub op_uid: i64,
                pub uid: i64,
                pub device_uid: i64,
                /// Comma-joined, stable order.
                pub parent_uids: String,
                pub name: String,
                /// Newline-joined, same order as `parent_uids`.
                pub path_list: String,
                pub goog_id: Option<String>,
                pub content_uid: Option<i64>,
                pub trashed: i32,
                pub is_shared: bool,
                pub is_live: bool,
                pub all_children_fetched: bool,
                pub create_ts: i64,
                pub modify_ts: i64,
                pub change_ts: i64,
                pub sync_ts: i64,
            }

            #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
            pub enum Relation {}

            impl ActiveModelBehavior for ActiveModel {}
        }
    };
}

op_node_table!(pending_local_file_src, "pending_local_file_src");
op_node_table!(pending_local_file_dst, "pending_local_file_dst");
op_node_table!(pending_local_dir_src, "pending_local_dir_src");
op_node_table!(pending_local_dir_dst, "pending_local_dir_dst");
op_node_table!(pending_gdrive_file_src, "pending_gdrive_file_src");
op_node_table!(pending_gdrive_file_dst, "pending_gdrive_file_dst");
op_node_table!(pending_gdrive_folder_src, "pending_gdrive_folder_src");
op_node_table!(pending_gdrive_folder_dst, "pending_gdrive_folder_dst");
op_node_table!(archive_local_file_src, "archive_local_file_src");
op_node_table!(archive_local_file_dst, "archive_local_file_dst");
op_node_table!(archive_local_dir_src, "archive_local_dir_src");
op_node_table!(archive_local_dir_dst, "archive_local_dir_dst");
op_node_table!(archive_gdrive_file_src, "archive_gdrive_file_src");
op_node_table!(archive_gdrive_file_dst, "archive_gdrive_file_dst");
op_node_table!(archive_gdrive_folder_src, "archive_gdrive_folder_src");
op_node_table!(archive_gdrive_folder_dst, "archive_gdrive_folder_dst");
