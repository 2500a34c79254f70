//! User-facing operations

pub mod transfer;
