//! Version resolution for incoming changes.

/// What to do with an incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Incoming is strictly newer: apply it.
    Apply,
    /// Already applied, or local is simply further ahead: do nothing.
    Ignore,
    /// Local holds unacknowledged changes newer than incoming.
    Conflict,
}

impl Decision {
    /// Returns true for [`Decision::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Decision::Conflict)
    }
}

/// Compares a local and an incoming version.
///
/// `local_version` is 0 when the record is absent locally. `local_pending`
/// is true when the record still has unprocessed journal entries, i.e. it
/// was modified since it was last confirmed with the peer.
///
/// Deletes follow the same ordering rule; applying a delete is a soft
/// delete, so the decision does not depend on the operation.
pub fn resolve(local_version: u64, incoming_version: u64, local_pending: bool) -> Decision {
    if incoming_version > local_version {
        Decision::Apply
    } else if incoming_version == local_version {
        Decision::Ignore
    } else if local_pending {
        Decision::Conflict
    } else {
        Decision::Ignore
    }
}
