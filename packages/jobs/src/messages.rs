//! Message types for the housekeeping actor.

use ractor::RpcReplyPort;

use crate::store::PersistReason;

#[derive(Debug)]
pub enum HousekeeperMessage {
    /// The store asked for a snapshot. Requests arriving before the save
    /// completes collapse into a no-op.
    Persist { reason: PersistReason },

    /// Periodic tick: retention sweep and save of unsaved changes.
    Tick,

    /// Save now and report whether the save succeeded.
    Flush { reply: RpcReplyPort<bool> },
}
