//! The `Repository` facade: wires the lock registry (C1-C5) and the policy
//! provider (C6-C10) behind the external-collaborator traits from spec.md
//! §1, and exposes the session-facing operations a host application calls
//! into (SPEC_FULL.md §0).

use crate::config::Config;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use ward_acl::{AclClusterChannel, CompiledPermissions, DefaultPolicyProvider, PolicyProvider, PrincipalResolver};
use ward_tree::external::{ClusterChannel, HierarchyService, JournalStorage, SessionHandle};
use ward_tree::{consolidate, Event, LockRegistry, LockToken, Nid, Path, PathBuf, RawEvent};

/// The two subsystems sharing one path-indexed backbone, wired for a single
/// workspace (spec.md §1-§2).
pub struct Repository {
    locks: Arc<LockRegistry>,
    policy: Arc<DefaultPolicyProvider>,
    hierarchy: Arc<dyn HierarchyService>,
    config: Config,
}

impl Repository {
    /// Constructs a repository over the given host collaborators, loading
    /// any persisted open-scoped locks from the journal.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        hierarchy: Arc<dyn HierarchyService>,
        journal: Arc<dyn JournalStorage>,
        lock_cluster: Option<Arc<dyn ClusterChannel>>,
        content: Arc<dyn ward_acl::PolicyStore>,
        principals: Arc<dyn PrincipalResolver>,
        acl_cluster: Option<Arc<dyn AclClusterChannel>>,
    ) -> Result<Self> {
        let locks = Arc::new(
            LockRegistry::new(hierarchy.clone(), journal, lock_cluster)
                .context("loading persisted lock journal")?,
        );
        let policy = Arc::new(DefaultPolicyProvider::new(
            content,
            principals,
            acl_cluster,
            config.entry_collector_cache_size,
            config.read_cache_size,
            config.administrators_principal.clone(),
            config.everyone_principal.clone(),
        ));
        Ok(Self {
            locks,
            policy,
            hierarchy,
            config,
        })
    }

    /// Seeds `root` with the default policy unless configured to skip it
    /// (spec.md §4.10).
    pub fn init_workspace(&self, root: Nid) {
        self.policy.init_workspace(root, self.config.omit_default_permissions);
    }

    /// The shared lock registry (C2), for a host that needs the
    /// `begin_update`/`end_update` batching protocol directly.
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// The shared policy provider (C10).
    pub fn policy(&self) -> &Arc<DefaultPolicyProvider> {
        &self.policy
    }

    /// Locks `nid` on behalf of `session` (spec.md §4.2 `lock`).
    #[allow(clippy::too_many_arguments)]
    pub fn lock(
        &self,
        nid: Nid,
        deep: bool,
        session_scoped: bool,
        timeout_hint_ms: i64,
        owner: impl Into<String>,
        session: SessionHandle,
    ) -> Result<LockToken> {
        self.locks
            .lock(nid, deep, session_scoped, timeout_hint_ms, owner, session)
            .map_err(Into::into)
    }

    /// Releases `session`'s lock on `nid` (spec.md §4.2 `unlock`).
    pub fn unlock(&self, nid: Nid, session: SessionHandle) -> Result<()> {
        self.locks.unlock(nid, session).map_err(Into::into)
    }

    /// Refuses with an error unless `path` is unlocked or locked by
    /// `session` (spec.md §4.2 `check_lock`).
    pub fn check_lock(&self, path: Path, session: SessionHandle) -> Result<()> {
        self.locks.check_lock(path, session).map_err(Into::into)
    }

    /// Compiles a permission evaluator for a session authenticated with
    /// `principal_names` (C8), registering it with the change notifier so
    /// its read cache is invalidated on policy mutation.
    pub fn compile_permissions(&self, principal_names: HashSet<String>) -> Arc<CompiledPermissions> {
        self.policy.compile_permissions(principal_names)
    }

    /// Notifies the core that `session` has logged out: session-scoped
    /// locks it held are released, open-scoped locks it held are detached
    /// (spec.md §1 "Session lifecycle", §4.2, §8 property 5).
    pub fn on_session_logout(&self, session: SessionHandle) {
        self.locks.logout(session);
    }

    /// Runs one pass of the lock timeout handler (spec.md §4.2 "Timeout
    /// handler"). A host schedules this at `config.lock_timeout_poll_interval`.
    pub fn run_timeout_tick(&self) {
        self.locks.expire_timed_out();
    }

    /// Consolidates a batch of raw hierarchy events and refreshes the lock
    /// registry's subtree rooted at `parent` (spec.md §4.2 "Hierarchy event
    /// handling"). ACL cache coherence for moves under `parent` is the
    /// caller's responsibility via [`Repository::policy`]'s change notifier,
    /// since only the host's content store knows which moved nodes were
    /// themselves access-controlled.
    pub fn refresh_locks_under(&self, raw_events: Vec<RawEvent>, parent: Path) -> Vec<Event> {
        let events = consolidate(raw_events);
        if !events.is_empty() {
            self.locks.refresh(parent);
        }
        events
    }

    /// Applies an inbound cluster lock event, bypassing transactional
    /// overlays (spec.md §4.3, §6).
    pub fn apply_external_lock(&self, nid: Nid, deep: bool, owner: impl Into<String>) {
        self.locks.apply_external_lock(nid, deep, owner);
    }

    /// Applies an inbound cluster unlock event.
    pub fn apply_external_unlock(&self, nid: Nid) {
        self.locks.apply_external_unlock(nid);
    }

    /// Applies an inbound cluster policy-change event.
    pub fn apply_external_policy_change(&self, nid: Nid, kind: ward_acl::PolicyChangeKind) {
        self.policy.notifier().apply_external(nid, kind);
    }

    /// Resolves `nid` to its current path via the hierarchy service.
    pub fn resolve(&self, nid: Nid) -> Option<PathBuf> {
        self.hierarchy.resolve(nid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use ward_acl::RawAce;
    use ward_tree::external::MemoryJournal;

    struct FakeHierarchy(Mutex<HashMap<Nid, PathBuf>>);
    impl FakeHierarchy {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(HashMap::new())))
        }
        fn set(&self, nid: Nid, path: &str) {
            self.0.lock().insert(nid, path.parse().unwrap());
        }
    }
    impl HierarchyService for FakeHierarchy {
        fn resolve(&self, nid: Nid) -> Option<PathBuf> {
            self.0.lock().get(&nid).cloned()
        }
    }

    #[derive(Default)]
    struct FakeContent {
        access_controlled: Mutex<std::collections::HashSet<Nid>>,
        entries: Mutex<HashMap<Nid, Vec<RawAce>>>,
        paths: Mutex<HashMap<Nid, PathBuf>>,
    }
    impl FakeContent {
        fn set(&self, nid: Nid, path: &str) {
            self.paths.lock().insert(nid, path.parse().unwrap());
        }
    }
    impl ward_acl::PolicyStore for FakeContent {
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
        fn parent(&self, _nid: Nid) -> Option<Nid> {
            None
        }
        fn path_of(&self, nid: Nid) -> Option<PathBuf> {
            self.paths.lock().get(&nid).cloned()
        }
        fn next_access_controlled_ancestor(&self, _nid: Nid) -> Option<Option<Nid>> {
            None
        }
        fn set_next_access_controlled_ancestor(&self, _nid: Nid, _next: Option<Nid>) {}
        fn repoint_skip_pointers(&self, _removed: Nid, _replacement: Option<Nid>) {}
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

    fn repo() -> (Arc<FakeHierarchy>, Arc<FakeContent>, Repository) {
        let hierarchy = FakeHierarchy::new();
        let content = Arc::new(FakeContent::default());
        let journal = Arc::new(MemoryJournal::default());
        let repo = Repository::new(
            Config::default(),
            hierarchy.clone(),
            journal,
            None,
            content.clone(),
            Arc::new(FakePrincipals),
            None,
        )
        .unwrap();
        (hierarchy, content, repo)
    }

    #[test]
    fn default_root_policy_lets_everyone_read() {
        let (hierarchy, content, repo) = repo();
        let root = Nid::new_random();
        hierarchy.set(root, "/");
        content.set(root, "/");
        repo.init_workspace(root);

        let names: HashSet<String> = ["everyone".to_string()].into_iter().collect();
        let perms = repo.compile_permissions(names);
        assert!(perms.can_read(root));
    }

    #[test]
    fn lock_then_check_lock_from_another_session_is_refused() {
        let (hierarchy, _content, repo) = repo();
        let a = Nid::new_random();
        hierarchy.set(a, "/a");
        let s1 = SessionHandle::new(1);
        let s2 = SessionHandle::new(2);
        repo.lock(a, false, false, i64::MAX, "s1", s1).unwrap();
        assert!(repo.check_lock("/a".parse::<PathBuf>().unwrap().as_path(), s2).is_err());
    }

    #[test]
    fn session_logout_releases_session_scoped_lock() {
        let (hierarchy, _content, repo) = repo();
        let a = Nid::new_random();
        hierarchy.set(a, "/a");
        let s = SessionHandle::new(1);
        repo.lock(a, false, true, i64::MAX, "s", s).unwrap();
        repo.on_session_logout(s);
        assert!(repo.check_lock("/a".parse::<PathBuf>().unwrap().as_path(), SessionHandle::new(2)).is_ok());
    }
}
