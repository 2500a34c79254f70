//! The gesture surface exposed to the RPC/UI layer

mod manager;

pub use manager::{ActionError, ActionManager, DragAndDropRequest};
