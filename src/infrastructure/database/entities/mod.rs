//! SeaORM entities for every persisted table

pub mod cache_entry;
pub mod content_meta;
pub mod device;
pub mod gdrive_node;
pub mod local_node;
pub mod op;
pub mod op_node;
pub mod uid_goog_id;
pub mod uid_path;
