//! C7 — the entry collector.
//!
//! Walks from a target node up to the root via access-controlled
//! ancestors only (using — and lazily filling — the skip pointer cached
//! on each node), gathering every locally declared entry along that chain
//! (spec.md §4.7). The cached payload is the *unfiltered* chain — spec.md
//! §3's `EffectiveEntries { local_entries, next_access_controlled_ancestor_id }`
//! is principal-independent by design, since one `EntryCollector` is shared
//! by every session (`DefaultPolicyProvider` builds a single collector and
//! hands the same `Arc` to every [`CompiledPermissions`][cp] it compiles).
//! Filtering by a session's principal set happens *after* cache retrieval,
//! in [`EntryCollector::collect_entries`]; caching a pre-filtered result
//! keyed only by node id would leak one session's entries to another
//! session querying the same node.
//!
//! [cp]: crate::permissions::CompiledPermissions

use crate::external::{PolicyStore, PrincipalResolver};
use crate::store::{entry_from_raw, Entry};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use ward_tree::Nid;

/// One collected entry together with the access-controlled node it was
/// declared on, which [`crate::permissions`] needs to tell a local entry
/// from an inherited one and to evaluate glob filters relative to the
/// right origin (spec.md §4.8).
#[derive(Clone, Debug)]
pub struct Collected {
    pub origin: Nid,
    pub entry: Entry,
}

/// Entries applicable to one target node, already filtered to a session's
/// principal set and split into user and group lists, ordered
/// deepest-ancestor-first (spec.md §4.7).
#[derive(Clone, Debug, Default)]
pub struct EffectiveEntries {
    pub user_entries: Vec<Collected>,
    pub group_entries: Vec<Collected>,
}

impl EffectiveEntries {
    /// Iterates `user_entries` then `group_entries`, the order
    /// [`crate::permissions`] evaluates them in.
    pub fn iter(&self) -> impl Iterator<Item = &Collected> {
        self.user_entries.iter().chain(self.group_entries.iter())
    }
}

/// Collects and caches the principal-independent entry chain per
/// access-controlled node; filtering to one session's principals happens
/// per call, never cached (see the module doc comment for why).
pub struct EntryCollector {
    content: Arc<dyn PolicyStore>,
    principals: Arc<dyn PrincipalResolver>,
    cache: Mutex<lru::LruCache<Nid, Vec<Collected>>>,
}

impl EntryCollector {
    /// Creates a collector with an LRU cache bounded at `cache_size`
    /// entries (default 5000 per spec.md §6 `cachingEntryCollector.maxSize`).
    pub fn new(
        content: Arc<dyn PolicyStore>,
        principals: Arc<dyn PrincipalResolver>,
        cache_size: usize,
    ) -> Self {
        Self {
            content,
            principals,
            cache: Mutex::new(lru::LruCache::new(cache_size.max(1))),
        }
    }

    /// The nearest access-controlled ancestor of `nid` (or `nid` itself),
    /// filling the skip pointer along the way if it was unknown.
    fn nearest_access_controlled(&self, nid: Nid) -> Option<Nid> {
        if self.content.is_access_controlled(nid) {
            return Some(nid);
        }
        match self.content.next_access_controlled_ancestor(nid) {
            Some(known) => known,
            None => {
                let mut current = self.content.parent(nid);
                while let Some(candidate) = current {
                    if self.content.is_access_controlled(candidate) {
                        self.content
                            .set_next_access_controlled_ancestor(nid, Some(candidate));
                        return Some(candidate);
                    }
                    current = self.content.parent(candidate);
                }
                self.content.set_next_access_controlled_ancestor(nid, None);
                None
            }
        }
    }

    /// Gathers every local entry along the access-controlled ancestor
    /// chain starting at `nid`, regardless of principal — this is the
    /// principal-independent payload that gets cached.
    fn collect_uncached(&self, nid: Nid) -> Vec<Collected> {
        let mut collected = Vec::new();
        let mut current = self.nearest_access_controlled(nid);
        while let Some(node) = current {
            for raw in self.content.local_entries(node) {
                let entry = match entry_from_raw(&raw) {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(
                            %node, principal = %raw.principal_name, %err,
                            "skipping entry with unrecognized privilege name"
                        );
                        continue;
                    }
                };
                collected.push(Collected { origin: node, entry });
            }
            current = match self.content.next_access_controlled_ancestor(node) {
                Some(next) => next,
                None => {
                    let next = self
                        .content
                        .parent(node)
                        .and_then(|p| self.nearest_access_controlled(p));
                    self.content.set_next_access_controlled_ancestor(node, next);
                    next
                }
            };
        }
        collected
    }

    /// Returns the effective entries applying to `principal_names` at
    /// `nid`: the cached principal-independent chain (computed from cache
    /// on a miss), filtered and split by principal on every call.
    pub fn collect_entries(&self, nid: Nid, principal_names: &HashSet<String>) -> EffectiveEntries {
        let Some(source) = self.nearest_access_controlled(nid) else {
            return EffectiveEntries::default();
        };
        let chain = match self.cache.lock().get(&source) {
            Some(cached) => cached.clone(),
            None => {
                let chain = self.collect_uncached(nid);
                self.cache.lock().put(source, chain.clone());
                chain
            }
        };

        let mut user_entries = Vec::new();
        let mut group_entries = Vec::new();
        for collected in chain {
            if !principal_names.contains(&collected.entry.principal_name) {
                continue;
            }
            if self.principals.is_group(&collected.entry.principal_name) {
                group_entries.push(collected);
            } else {
                user_entries.push(collected);
            }
        }
        EffectiveEntries {
            user_entries,
            group_entries,
        }
    }

    /// Clears the entire cache (spec.md §4.9 POLICY_ADDED and MOVE).
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Removes `nid`'s cache entry, and patches any cached entry whose
    /// skip pointer equals `nid` to point at `replacement` instead
    /// (spec.md §4.9 POLICY_REMOVED).
    pub fn remove_cached(&self, nid: Nid, replacement: Option<Nid>) {
        self.cache.lock().pop(&nid);
        // The skip pointer itself lives on the content store, not in this
        // cache; the store is responsible for patching pointers that
        // referenced the removed node (see `on_policy_removed`).
        let _ = replacement;
    }

    pub(crate) fn content(&self) -> &Arc<dyn PolicyStore> {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::RawAce;
    use parking_lot::Mutex as StdMutex;
    use std::collections::HashMap;
    use ward_tree::PathBuf;

    #[derive(Default)]
    struct FakeStore {
        access_controlled: StdMutex<HashSet<Nid>>,
        entries: StdMutex<HashMap<Nid, Vec<RawAce>>>,
        parents: StdMutex<HashMap<Nid, Nid>>,
        skip: StdMutex<HashMap<Nid, Option<Nid>>>,
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
        fn path_of(&self, _nid: Nid) -> Option<PathBuf> {
            None
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
        fn is_group(&self, name: &str) -> bool {
            name == "everyone"
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
    fn collects_from_nearest_access_controlled_ancestor() {
        let store = Arc::new(FakeStore::default());
        let root = Nid::new_random();
        let child = Nid::new_random();
        store.mark_access_controlled(root);
        store.set_local_entries(root, vec![ace("alice", true)]);
        store.parents.lock().insert(child, root);

        let collector = EntryCollector::new(store, Arc::new(FakePrincipals), 10);
        let names: HashSet<String> = ["alice".to_string()].into_iter().collect();
        let effective = collector.collect_entries(child, &names);
        assert_eq!(effective.user_entries.len(), 1);
        assert!(effective.group_entries.is_empty());
    }

    #[test]
    fn group_entries_are_kept_separate_from_user_entries() {
        let store = Arc::new(FakeStore::default());
        let root = Nid::new_random();
        store.mark_access_controlled(root);
        store.set_local_entries(
            root,
            vec![ace("alice", true), ace("everyone", true)],
        );

        let collector = EntryCollector::new(store, Arc::new(FakePrincipals), 10);
        let names: HashSet<String> = ["alice".to_string(), "everyone".to_string()]
            .into_iter()
            .collect();
        let effective = collector.collect_entries(root, &names);
        assert_eq!(effective.user_entries.len(), 1);
        assert_eq!(effective.group_entries.len(), 1);
    }

    #[test]
    fn repeated_collection_hits_cache() {
        let store = Arc::new(FakeStore::default());
        let root = Nid::new_random();
        store.mark_access_controlled(root);
        store.set_local_entries(root, vec![ace("alice", true)]);

        let collector = EntryCollector::new(store, Arc::new(FakePrincipals), 10);
        let names: HashSet<String> = ["alice".to_string()].into_iter().collect();
        let first = collector.collect_entries(root, &names);
        let second = collector.collect_entries(root, &names);
        assert_eq!(first.user_entries.len(), second.user_entries.len());
    }

    #[test]
    fn different_principal_sets_never_see_each_others_entries_via_the_shared_cache() {
        // The regression this guards: one EntryCollector (and its cache) is
        // shared across every session. A cache keyed by node id alone, with
        // a principal-filtered value, would let session B observe session
        // A's filtered results for the same node.
        let store = Arc::new(FakeStore::default());
        let root = Nid::new_random();
        store.mark_access_controlled(root);
        store.set_local_entries(root, vec![ace("alice", true), ace("bob", true)]);

        let collector = EntryCollector::new(store, Arc::new(FakePrincipals), 10);
        let alice: HashSet<String> = ["alice".to_string()].into_iter().collect();
        let bob: HashSet<String> = ["bob".to_string()].into_iter().collect();

        let for_alice = collector.collect_entries(root, &alice);
        assert_eq!(for_alice.user_entries.len(), 1);
        assert_eq!(for_alice.user_entries[0].entry.principal_name, "alice");

        // Same node, different (and now cache-populated) principal set.
        let for_bob = collector.collect_entries(root, &bob);
        assert_eq!(for_bob.user_entries.len(), 1);
        assert_eq!(for_bob.user_entries[0].entry.principal_name, "bob");
    }
}
