//! C8 — compiled permissions.
//!
//! For one session's principal set, evaluates the entries [`EntryCollector`]
//! gathers into permission decisions, and caches read decisions by node id
//! (spec.md §4.8). A `CompiledPermissions` never walks the ACL store
//! itself; it only consumes [`crate::collector::Collected`] entries and the
//! handful of [`PolicyStore`] facts (path, parent, access-controlled-ness)
//! the evaluation rules need.

use crate::collector::{Collected, EntryCollector};
use crate::error::{Error, Result};
use crate::external::PolicyStore;
use crate::privilege::{PermBits, PrivBits};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use ward_tree::{Nid, PathBuf};

/// The result of compiling permissions for one node: the accumulated
/// allow/deny permission and privilege sets (spec.md §3 `CompiledResult`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompiledResult {
    pub allows: PermBits,
    pub denies: PermBits,
    pub allow_privs: PrivBits,
    pub deny_privs: PrivBits,
}

impl Default for CompiledResult {
    fn default() -> Self {
        Self {
            allows: PermBits::empty(),
            denies: PermBits::empty(),
            allow_privs: PrivBits::empty(),
            deny_privs: PrivBits::empty(),
        }
    }
}

impl CompiledResult {
    /// True if every bit of `perm` was granted and none denied.
    pub fn permits(&self, perm: PermBits) -> bool {
        self.allows.contains(perm) && !self.denies.intersects(perm)
    }
}

/// `diff(a, b) = a & !b` (spec.md §3).
fn diff(a: PrivBits, b: PrivBits) -> PrivBits {
    a & !b
}

fn permbits_diff(a: PermBits, b: PermBits) -> PermBits {
    a & !b
}

fn relative_path(origin: &PathBuf, target: &PathBuf) -> String {
    let origin_len = origin.as_path().segments().len();
    let target_segments = target.as_path().segments();
    target_segments
        .get(origin_len.min(target_segments.len())..)
        .unwrap_or(&[])
        .iter()
        .map(|s| s.name().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// True if any segment of `path` is named `policy`: the node (or property)
/// lies inside a policy subtree and its own permissions derive from the
/// AC-management privileges rather than the regular read/write ones
/// (spec.md §4.8, Glossary "AC item").
fn is_ac_item(path: &PathBuf) -> bool {
    path.as_path().segments().iter().any(|s| s.name() == "policy")
}

/// Maps a privilege bitset (evaluated at the node, plus whatever applied at
/// its parent) to the permission bitset it grants, per the rules of
/// spec.md §4.8. Applied once for the allow side and once for the deny
/// side with their respective accumulators.
pub fn calculate_permissions(privs: PrivBits, parent_privs: PrivBits, is_ac_item: bool) -> PermBits {
    let mut perms = PermBits::empty();
    if is_ac_item {
        if privs.contains(PrivBits::READ_AC) {
            perms |= PermBits::READ_NODE | PermBits::READ_PROPERTY;
        }
        if privs.contains(PrivBits::MODIFY_AC) {
            perms |= PermBits::SET_PROPERTY
                | PermBits::REMOVE_PROPERTY
                | PermBits::ADD_NODE
                | PermBits::REMOVE_NODE;
        }
    } else {
        if privs.contains(PrivBits::READ) {
            perms |= PermBits::READ_NODE | PermBits::READ_PROPERTY;
        }
        if privs.contains(PrivBits::MODIFY_PROPERTIES) {
            perms |= PermBits::SET_PROPERTY | PermBits::REMOVE_PROPERTY;
        }
        if privs.contains(PrivBits::READ_AC) {
            perms |= PermBits::READ_AC;
        }
        if privs.contains(PrivBits::MODIFY_AC) {
            perms |= PermBits::MODIFY_AC;
        }
    }
    if parent_privs.contains(PrivBits::ADD_CHILD_NODES) {
        perms |= PermBits::ADD_NODE;
    }
    if parent_privs.contains(PrivBits::REMOVE_CHILD_NODES) && privs.contains(PrivBits::REMOVE_NODE) {
        perms |= PermBits::REMOVE_NODE;
    }
    perms
}

/// Listener interface the change notifier (C9) holds a weak reference to,
/// so that dropping a `CompiledPermissions` never requires an explicit
/// unsubscribe call (spec.md §9 "Cyclic listener references").
pub trait ReadCacheInvalidation: Send + Sync {
    /// Drops every cached read decision, keeping the principal set.
    fn invalidate_read_cache(&self);
}

/// Per-session compiled permission evaluator (C8).
pub struct CompiledPermissions {
    content: Arc<dyn PolicyStore>,
    collector: Arc<EntryCollector>,
    principal_names: HashSet<String>,
    read_cache: Mutex<lru::LruCache<Nid, bool>>,
}

impl CompiledPermissions {
    /// Creates a compiled-permissions instance for `principal_names`, with
    /// a read-decision cache bounded at `cache_size` (default 5000 per
    /// spec.md §6 `readCache.maxSize`).
    pub fn new(
        content: Arc<dyn PolicyStore>,
        collector: Arc<EntryCollector>,
        principal_names: HashSet<String>,
        cache_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            content,
            collector,
            principal_names,
            read_cache: Mutex::new(lru::LruCache::new(cache_size.max(1))),
        })
    }

    /// A weak handle to register with a [`crate::notifier::ChangeNotifier`].
    pub fn listener_handle(self: &Arc<Self>) -> Weak<dyn ReadCacheInvalidation> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak as Weak<dyn ReadCacheInvalidation>
    }

    /// Builds the full [`CompiledResult`] for `nid`, defaulting to no
    /// permissions if `nid` has no resolvable path. Used by [`can_read`],
    /// which has no error to propagate.
    ///
    /// [`can_read`]: CompiledPermissions::can_read
    pub fn build(&self, nid: Nid) -> CompiledResult {
        self.try_build(nid).unwrap_or_default()
    }

    /// Builds the full [`CompiledResult`] for `nid` by iterating its
    /// effective entries in collection order (spec.md §4.8), failing with
    /// [`Error::NodeNotFound`] if `nid` has no resolvable path.
    fn try_build(&self, nid: Nid) -> Result<CompiledResult> {
        let target_path = self.content.path_of(nid).ok_or(Error::NodeNotFound)?;
        let ac_item = is_ac_item(&target_path);
        let parent_path = target_path.parent();
        let effective = self.collector.collect_entries(nid, &self.principal_names);

        let mut result = CompiledResult::default();
        let mut parent_allows = PrivBits::empty();
        let mut parent_denies = PrivBits::empty();

        for Collected { origin, entry } in effective.iter() {
            let is_local = *origin == nid && self.content.is_access_controlled(nid);
            let Some(origin_path) = self.content.path_of(*origin) else {
                continue;
            };
            let target_relative = relative_path(&origin_path, &target_path);
            let applies_to_target = entry.matches_glob(&target_relative);
            let applies_to_parent = parent_path
                .as_ref()
                .map(|p| entry.matches_glob(&relative_path(&origin_path, p)))
                .unwrap_or(false);
            let matches_parent = !is_local && applies_to_parent;

            if matches_parent {
                if entry.allow {
                    parent_allows |= diff(entry.privileges, parent_denies);
                } else {
                    parent_denies |= diff(entry.privileges, parent_allows);
                }
            }

            if !applies_to_target {
                continue;
            }
            if entry.allow {
                result.allow_privs |= diff(entry.privileges, result.deny_privs);
                let perms = calculate_permissions(result.allow_privs, parent_allows, ac_item);
                result.allows |= permbits_diff(perms, result.denies);
            } else {
                result.deny_privs |= diff(entry.privileges, result.allow_privs);
                let perms = calculate_permissions(result.deny_privs, parent_denies, ac_item);
                result.denies |= permbits_diff(perms, result.allows);
            }
        }
        Ok(result)
    }

    /// Checks `perm` against `nid`, returning [`Error::NodeNotFound`] if
    /// `nid` has no resolvable path, or [`Error::AccessDenied`] on refusal.
    /// Not cached (only `can_read` takes the cached short path per spec.md
    /// §4.8).
    pub fn check_permission(&self, nid: Nid, perm: PermBits) -> Result<()> {
        if self.try_build(nid)?.permits(perm) {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }

    /// Returns whether `nid` is readable, from the per-session cache on a
    /// hit, otherwise running the full [`build`] and caching the `READ_NODE`
    /// bit (spec.md §4.8 "`can_read` takes the short path").
    ///
    /// [`build`]: CompiledPermissions::build
    pub fn can_read(&self, nid: Nid) -> bool {
        if let Some(cached) = self.read_cache.lock().get(&nid) {
            return *cached;
        }
        let readable = self.build(nid).allows.contains(PermBits::READ_NODE);
        self.read_cache.lock().put(nid, readable);
        readable
    }
}

impl ReadCacheInvalidation for CompiledPermissions {
    fn invalidate_read_cache(&self) {
        self.read_cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{PrincipalResolver, RawAce};
    use parking_lot::Mutex as StdMutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeStore {
        access_controlled: StdMutex<HashSet<Nid>>,
        entries: StdMutex<HashMap<Nid, Vec<RawAce>>>,
        parents: StdMutex<HashMap<Nid, Nid>>,
        paths: StdMutex<HashMap<Nid, PathBuf>>,
        skip: StdMutex<HashMap<Nid, Option<Nid>>>,
    }

    impl FakeStore {
        fn set(&self, nid: Nid, path: &str, parent: Option<Nid>) {
            self.paths.lock().insert(nid, path.parse().unwrap());
            if let Some(parent) = parent {
                self.parents.lock().insert(nid, parent);
            }
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

    fn ace(principal: &str, allow: bool, privs: &[&str]) -> RawAce {
        RawAce {
            principal_name: principal.to_string(),
            allow,
            privileges: privs.iter().map(|s| s.to_string()).collect(),
            glob: None,
        }
    }

    fn setup() -> (Arc<FakeStore>, Arc<EntryCollector>) {
        let store = Arc::new(FakeStore::default());
        let collector = Arc::new(EntryCollector::new(
            store.clone(),
            Arc::new(FakePrincipals),
            10,
        ));
        (store, collector)
    }

    fn names(principal: &str) -> HashSet<String> {
        [principal.to_string()].into_iter().collect()
    }

    #[test]
    fn grant_read_allows_read_node() {
        let (store, collector) = setup();
        let node = Nid::new_random();
        store.set(node, "/n", None);
        store.mark_access_controlled(node);
        store.set_local_entries(node, vec![ace("alice", true, &["READ"])]);

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(perms.can_read(node));
    }

    #[test]
    fn deny_before_allow_for_same_principal_wins() {
        // S4: ACL = [deny READ, allow READ] for the same principal.
        let (store, collector) = setup();
        let node = Nid::new_random();
        store.set(node, "/n", None);
        store.mark_access_controlled(node);
        store.set_local_entries(
            node,
            vec![ace("alice", false, &["READ"]), ace("alice", true, &["READ"])],
        );

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(!perms.can_read(node));
    }

    #[test]
    fn no_entries_denies_read() {
        let (store, collector) = setup();
        let node = Nid::new_random();
        store.set(node, "/n", None);

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(!perms.can_read(node));
    }

    #[test]
    fn read_cache_hits_on_second_lookup() {
        let (store, collector) = setup();
        let node = Nid::new_random();
        store.set(node, "/n", None);
        store.mark_access_controlled(node);
        store.set_local_entries(node, vec![ace("alice", true, &["READ"])]);

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(perms.can_read(node));
        assert!(perms.can_read(node));
    }

    #[test]
    fn invalidate_read_cache_clears_cached_decision() {
        let (store, collector) = setup();
        let node = Nid::new_random();
        store.set(node, "/n", None);
        store.mark_access_controlled(node);
        store.set_local_entries(node, vec![ace("alice", true, &["READ"])]);

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(perms.can_read(node));
        perms.invalidate_read_cache();
        // Cache cleared, but the backing ACL is unchanged so the decision
        // stays the same; this only proves the clear doesn't panic or wedge.
        assert!(perms.can_read(node));
    }

    #[test]
    fn check_permission_reports_node_not_found_for_unresolvable_path() {
        let (store, collector) = setup();
        let node = Nid::new_random();
        // Deliberately not registered with `store.set`, so `path_of` is `None`.

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        assert!(matches!(
            perms.check_permission(node, PermBits::READ_NODE),
            Err(Error::NodeNotFound)
        ));
    }

    #[test]
    fn add_child_nodes_on_parent_grants_add_node_permission() {
        let (store, collector) = setup();
        let parent = Nid::new_random();
        let child = Nid::new_random();
        store.set(parent, "/p", None);
        store.set(child, "/p/c", Some(parent));
        store.mark_access_controlled(parent);
        store.set_local_entries(
            parent,
            vec![ace("alice", true, &["READ", "ADD_CHILD_NODES"])],
        );

        let perms = CompiledPermissions::new(store, collector, names("alice"), 10);
        let result = perms.build(child);
        assert!(result.permits(PermBits::ADD_NODE));
    }
}
