//! C9 — the change notifier.
//!
//! Subscribes (conceptually — the host's item store calls [`on_policy_change`]
//! when it observes a mutation under a `policy` subtree) to structural
//! changes on access-controlled nodes, invalidates the entry collector's
//! cache accordingly, and fans the event out to every live
//! [`ReadCacheInvalidation`] listener plus the cluster channel (spec.md
//! §4.9).
//!
//! [`on_policy_change`]: ChangeNotifier::on_policy_change

use crate::collector::EntryCollector;
use crate::permissions::ReadCacheInvalidation;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use ward_tree::Nid;

/// The kind of structural change observed under a `policy` subtree
/// (spec.md §4.9).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PolicyChangeKind {
    /// A `policy` child (or the `AccessControllable` mixin) was added.
    Added,
    /// A `policy` child was removed.
    Removed,
    /// An ACE's privileges, or the set of ACEs, changed in place.
    Modified,
    /// The access-controlled node itself moved.
    Moved,
}

/// Broadcasts ACL mutations to peer nodes. Distinct from
/// [`ward_tree::ClusterChannel`] because the two subsystems announce
/// different event shapes over the same physical channel (spec.md §1, §6).
pub trait AclClusterChannel: Send + Sync {
    /// Announces that `nid`'s policy changed in `kind` on this node.
    fn announce_policy_change(&self, nid: Nid, kind: PolicyChangeKind);
}

/// Orchestrates cache invalidation across C7 and every live C8 instance
/// when a policy node is mutated (C9).
pub struct ChangeNotifier {
    collector: Arc<EntryCollector>,
    cluster: Option<Arc<dyn AclClusterChannel>>,
    listeners: Mutex<Vec<Weak<dyn ReadCacheInvalidation>>>,
}

impl ChangeNotifier {
    /// Creates a notifier bound to `collector`'s cache, optionally
    /// broadcasting to `cluster`.
    pub fn new(collector: Arc<EntryCollector>, cluster: Option<Arc<dyn AclClusterChannel>>) -> Self {
        Self {
            collector,
            cluster,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a weak handle to a `CompiledPermissions` instance's read
    /// cache. The handle is dropped from the list the next time it fails
    /// to upgrade, so a `CompiledPermissions` never needs an explicit
    /// unsubscribe call (spec.md §9 "Cyclic listener references").
    pub fn register_listener(&self, listener: Weak<dyn ReadCacheInvalidation>) {
        self.listeners.lock().push(listener);
    }

    /// Applies a structural policy change at `nid`: invalidates C7's cache
    /// per the table in spec.md §4.9, then notifies every live C8 listener
    /// and the cluster channel.
    pub fn on_policy_change(&self, nid: Nid, kind: PolicyChangeKind) {
        match kind {
            PolicyChangeKind::Added | PolicyChangeKind::Moved => {
                self.collector.clear_cache();
            }
            PolicyChangeKind::Removed => {
                let replacement = self
                    .collector
                    .content()
                    .next_access_controlled_ancestor(nid)
                    .flatten();
                self.collector.remove_cached(nid, replacement);
                self.collector.content().repoint_skip_pointers(nid, replacement);
            }
            PolicyChangeKind::Modified => {
                self.collector.remove_cached(nid, None);
            }
        }
        self.notify_listeners();
        if let Some(cluster) = &self.cluster {
            cluster.announce_policy_change(nid, kind);
        }
        tracing::info!(%nid, ?kind, "policy change applied, caches invalidated");
    }

    /// Applies an inbound cluster policy-change event, bypassing whatever
    /// local transaction context might otherwise wrap a mutation (spec.md
    /// §4.3, §6): cluster events always apply directly.
    pub fn apply_external(&self, nid: Nid, kind: PolicyChangeKind) {
        match kind {
            PolicyChangeKind::Added | PolicyChangeKind::Moved => self.collector.clear_cache(),
            PolicyChangeKind::Removed => {
                let replacement = self
                    .collector
                    .content()
                    .next_access_controlled_ancestor(nid)
                    .flatten();
                self.collector.remove_cached(nid, replacement);
                self.collector.content().repoint_skip_pointers(nid, replacement);
            }
            PolicyChangeKind::Modified => self.collector.remove_cached(nid, None),
        }
        self.notify_listeners();
    }

    fn notify_listeners(&self) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.invalidate_read_cache();
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{PolicyStore, PrincipalResolver, RawAce};
    use crate::permissions::CompiledPermissions;
    use parking_lot::Mutex as StdMutex;
    use std::collections::{HashMap, HashSet};
    use ward_tree::PathBuf;

    #[derive(Default)]
    struct FakeStore {
        access_controlled: StdMutex<HashSet<Nid>>,
        entries: StdMutex<HashMap<Nid, Vec<RawAce>>>,
        parents: StdMutex<HashMap<Nid, Nid>>,
        paths: StdMutex<HashMap<Nid, PathBuf>>,
        skip: StdMutex<HashMap<Nid, Option<Nid>>>,
    }

    impl FakeStore {
        fn set(&self, nid: Nid, path: &str) {
            self.paths.lock().insert(nid, path.parse().unwrap());
        }
    }

    impl PolicyStore for FakeStore {
        fn is_access_controlled(&self, nid: Nid) -> bool {
            self.access_controlled.lock().contains(&nid)
        }
        fn local_entries(&self, nid: Nid) -> Vec<RawAce> {
            self.entries.lock().get(&nid).cloned().unwrap_or_default()
        }
        fn set_local_entries(&self, nid: Nid, entries: Vec<RawAce>) {
            self.entries.lock().insert(nid, entries);
        }
        fn mark_access_controlled(&self, nid: Nid) {
            self.access_controlled.lock().insert(nid);
        }
        fn parent(&self, nid: Nid) -> Option<Nid> {
            self.parents.lock().get(&nid).copied()
        }
        fn path_of(&self, nid: Nid) -> Option<PathBuf> {
            self.paths.lock().get(&nid).cloned()
        }
        fn next_access_controlled_ancestor(&self, nid: Nid) -> Option<Option<Nid>> {
            self.skip.lock().get(&nid).copied()
        }
        fn set_next_access_controlled_ancestor(&self, nid: Nid, next: Option<Nid>) {
            self.skip.lock().insert(nid, next);
        }
        fn repoint_skip_pointers(&self, removed: Nid, replacement: Option<Nid>) {
            let mut skip = self.skip.lock();
            for next in skip.values_mut() {
                if *next == Some(removed) {
                    *next = replacement;
                }
            }
        }
    }

    struct FakePrincipals;
    impl PrincipalResolver for FakePrincipals {
        fn exists(&self, _name: &str) -> bool {
            true
        }
        fn is_group(&self, _name: &str) -> bool {
            false
        }
    }

    fn ace(principal: &str, allow: bool) -> RawAce {
        RawAce {
            principal_name: principal.to_string(),
            allow,
            privileges: vec!["READ".to_string()],
            glob: None,
        }
    }

    #[test]
    fn policy_modified_invalidates_read_caches_of_live_listeners() {
        let store = Arc::new(FakeStore::default());
        let node = Nid::new_random();
        store.set(node, "/n");
        store.mark_access_controlled(node);
        store.set_local_entries(node, vec![ace("alice", true)]);

        let collector = Arc::new(EntryCollector::new(store.clone(), Arc::new(FakePrincipals), 10));
        let notifier = ChangeNotifier::new(collector.clone(), None);

        let names: HashSet<String> = ["alice".to_string()].into_iter().collect();
        let perms = CompiledPermissions::new(store.clone(), collector, names, 10);
        notifier.register_listener(perms.listener_handle());

        assert!(perms.can_read(node));
        store.set_local_entries(node, vec![]);
        notifier.on_policy_change(node, PolicyChangeKind::Modified);
        assert!(!perms.can_read(node));
    }

    #[test]
    fn dropped_listener_is_pruned_without_panicking() {
        let store = Arc::new(FakeStore::default());
        let node = Nid::new_random();
        store.set(node, "/n");
        let collector = Arc::new(EntryCollector::new(store.clone(), Arc::new(FakePrincipals), 10));
        let notifier = ChangeNotifier::new(collector.clone(), None);

        {
            let perms = CompiledPermissions::new(store, collector, HashSet::new(), 10);
            notifier.register_listener(perms.listener_handle());
        }
        notifier.on_policy_change(node, PolicyChangeKind::Modified);
        assert_eq!(notifier.listeners.lock().len(), 0);
    }
}
