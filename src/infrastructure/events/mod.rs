//! Event bus for decoupled communication
//!
//! Subscribers (the RPC layer, the UI bridge, tests) receive every signal the
//! engine publishes. Emission never blocks and never fails; a receiver that
//! falls behind simply misses the lagged window.

use crate::domain::{DeviceUid, Spid, SpidNodePair, TreeId, Uid};
use tokio::sync::broadcast;

/// Signals published by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A node was inserted or merged in some tree store.
    NodeUpserted { sn: SpidNodePair },

    /// A node was removed from some tree store.
    NodeRemoved { sn: SpidNodePair },

    /// A subtree was changed wholesale (scanner or change-log delivery).
    SubtreeNodesChanged {
        root_spid: Spid,
        upserted: Vec<SpidNodePair>,
        removed: Vec<SpidNodePair>,
    },

    /// A display tree was rebuilt and should be re-rendered.
    DisplayTreeChanged { tree_id: TreeId },

    /// A two-sided diff finished computing.
    DiffTreesDone {
        left_tree_id: TreeId,
        right_tree_id: TreeId,
    },

    /// Op execution was paused or resumed.
    OpExecutionPlayStateChanged { is_enabled: bool },

    /// A batch could not be planned, persisted, enqueued, or executed.
    BatchFailed {
        batch_uid: Uid,
        msg: String,
        secondary_msg: String,
    },

    /// A device appeared or changed in the device registry.
    DeviceUpserted {
        device_uid: DeviceUid,
        friendly_name: String,
    },

    /// Generic user-visible error.
    ErrorOccurred { msg: String, secondary_msg: String },
}

/// Broadcast bus carrying [`Event`]s.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Send errors (no receivers) are ignored.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
