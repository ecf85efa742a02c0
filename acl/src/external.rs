//! Traits for the collaborators this crate consumes but does not
//! implement: the policy content itself (read/write through the item
//! store) and principal resolution.

use ward_tree::{Nid, PathBuf};

/// One ACE as persisted in the content tree: principal name, polarity,
/// and privilege names exactly as stored (not yet validated).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawAce {
    pub principal_name: String,
    pub allow: bool,
    pub privileges: Vec<String>,
    /// An optional glob restricting the entry to a subtree below the
    /// access-controlled node (spec.md §4.7 "glob path filter").
    pub glob: Option<String>,
}

/// Read/write access to the `policy` child of access-controlled nodes,
/// and to the `AccessControllable` mixin itself (spec.md §4.6).
///
/// This crate never walks the content tree directly; every structural
/// question goes through this trait so the host's actual storage layer
/// (the item store) stays in charge of persistence and event dispatch.
pub trait PolicyStore: Send + Sync {
    /// True if `nid` carries the `AccessControllable` mixin and a
    /// `policy` child.
    fn is_access_controlled(&self, nid: Nid) -> bool;

    /// The raw entries under `nid`'s `policy` child, in list order.
    /// Empty (not an error) if `nid` is not access-controlled.
    fn local_entries(&self, nid: Nid) -> Vec<RawAce>;

    /// Overwrites `nid`'s `policy` child with `entries`, in list order.
    fn set_local_entries(&self, nid: Nid, entries: Vec<RawAce>);

    /// Installs the `AccessControllable` mixin and an empty `policy`
    /// child on `nid`, if not already present.
    fn mark_access_controlled(&self, nid: Nid);

    /// `nid`'s parent, or `None` at the root.
    fn parent(&self, nid: Nid) -> Option<Nid>;

    /// `nid`'s current path, for glob-filter evaluation.
    fn path_of(&self, nid: Nid) -> Option<PathBuf>;

    /// The cached skip pointer to the nearest access-controlled ancestor
    /// strictly above `nid`: `None` if never computed, `Some(None)` if
    /// known to not exist (root reached), `Some(Some(id))` if known.
    fn next_access_controlled_ancestor(&self, nid: Nid) -> Option<Option<Nid>>;

    /// Lazily fills the skip pointer computed by the entry collector.
    fn set_next_access_controlled_ancestor(&self, nid: Nid, next: Option<Nid>);

    /// Repoints every node whose skip pointer equals `removed` to
    /// `replacement` instead (spec.md §4.9 `POLICY_REMOVED`). Only the
    /// content store can answer "who points at me", so this is the one
    /// operation the change notifier delegates back to it rather than
    /// handling in the entry collector's own cache.
    fn repoint_skip_pointers(&self, removed: Nid, replacement: Option<Nid>);
}

/// Resolves principal names to their existence and kind.
pub trait PrincipalResolver: Send + Sync {
    /// True if `name` names a known principal (user or group), or an
    /// allowed anonymous fallback.
    fn exists(&self, name: &str) -> bool;

    /// True if `name` names a group principal (evaluated after user
    /// entries during collection, spec.md §4.7).
    fn is_group(&self, name: &str) -> bool;
}
