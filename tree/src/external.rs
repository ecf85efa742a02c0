//! Traits for the collaborators this crate consumes but does not implement
//! (spec.md §1): the hierarchy service, the cluster channel, and the
//! journal's backing byte store. Wiring a concrete implementation of each is
//! the host application's job — this crate only calls through them.

use crate::nid::Nid;
use crate::path::PathBuf;

/// Resolves between stable node identifiers and their current path.
///
/// Implementations are expected to be cheap and infallible for nodes that
/// exist; a `None` return means the node has been removed (or never
/// existed), which the lock registry treats as "no longer live", never as
/// an error.
pub trait HierarchyService: Send + Sync {
    /// The current path of `nid`, or `None` if it no longer resolves.
    fn resolve(&self, nid: Nid) -> Option<PathBuf>;
}

/// Broadcasts lock lifecycle events to peer nodes in the cluster.
///
/// These are best-effort notifications: a dropped message does not put the
/// local registry in an inconsistent state, since the registry's own
/// mutation always happens first (spec.md §5 ordering guarantees).
pub trait ClusterChannel: Send + Sync {
    /// Announces that `nid` was locked by `owner`.
    fn announce_lock(&self, nid: Nid, deep: bool, owner: &str);
    /// Announces that `nid` was unlocked.
    fn announce_unlock(&self, nid: Nid);
}

/// Byte-level persistence for the lock journal (spec.md §1 "Persistent file
/// system").
pub trait JournalStorage: Send + Sync {
    /// Overwrites the journal with `contents`.
    fn save(&self, contents: &str) -> std::io::Result<()>;
    /// Reads the journal, or `None` if it has never been written.
    fn load(&self) -> std::io::Result<Option<String>>;
}

/// A session identifier, opaque to this crate. The host application mints
/// these and is responsible for the contract that a given handle is used by
/// one thread at a time (spec.md §5).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wraps a raw session identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The handle reserved for the system session, used to force-expire
    /// locks whose holder session has detached (spec.md §4.2 "Timeout
    /// handler").
    pub const SYSTEM: SessionHandle = SessionHandle(0);
}

/// An in-memory, non-persistent [`JournalStorage`] backed by a mutex-guarded
/// `String`. Useful for tests and for hosts that deliberately run without
/// open-scoped lock persistence.
#[derive(Default)]
pub struct MemoryJournal(parking_lot::Mutex<Option<String>>);

impl JournalStorage for MemoryJournal {
    fn save(&self, contents: &str) -> std::io::Result<()> {
        *self.0.lock() = Some(contents.to_string());
        Ok(())
    }

    fn load(&self) -> std::io::Result<Option<String>> {
        Ok(self.0.lock().clone())
    }
}
