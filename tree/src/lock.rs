//! C2 — the lock registry.
//!
//! Holds [`LockRecord`]s at the leaves of a [`PathTrie`], enforcing the
//! deep/shallow mutual-exclusion invariants of spec.md §4.2 and persisting
//! open-scoped locks to a journal. A single reentrant mutex guards the
//! trie so that the `begin_update`/`end_update`/`cancel_update` batching
//! protocol (spec.md §5, §9) can hold the lock across several operations
//! from the same thread without deadlocking on itself.

use crate::error::{Error, Result};
use crate::external::{ClusterChannel, HierarchyService, JournalStorage, SessionHandle};
use crate::nid::Nid;
use crate::path::{Path, PathBuf};
use crate::token::LockToken;
use crate::trie::{ElementId, PathTrie};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A lock held at a single node (spec.md §3).
#[derive(Clone, Debug)]
pub struct LockRecord {
    holder_nid: Nid,
    deep: bool,
    session_scoped: bool,
    owner_string: String,
    timeout_hint_ms: i64,
    created_at: Instant,
    live: bool,
    current_holder_session: Option<SessionHandle>,
}

impl LockRecord {
    /// The node this record is rooted at.
    pub fn holder_nid(&self) -> Nid {
        self.holder_nid
    }

    /// Whether the lock extends to the entire subtree.
    pub fn deep(&self) -> bool {
        self.deep
    }

    /// Whether the lock ends at session logout rather than surviving it.
    pub fn session_scoped(&self) -> bool {
        self.session_scoped
    }

    /// The caller-supplied owner string.
    pub fn owner(&self) -> &str {
        &self.owner_string
    }

    /// The session currently attached as holder, if any.
    pub fn holder_session(&self) -> Option<SessionHandle> {
        self.current_holder_session
    }

    /// The token addressing this record.
    pub fn token(&self) -> LockToken {
        LockToken::new(self.holder_nid)
    }

    fn is_expired(&self, now: Instant) -> bool {
        if self.timeout_hint_ms == i64::MAX {
            return false;
        }
        now.saturating_duration_since(self.created_at).as_millis() as i64 > self.timeout_hint_ms
    }
}

struct Inner {
    trie: PathTrie<LockRecord>,
    /// Current path of every live record, keyed by holder nid — avoids
    /// re-walking the trie to find a record's element once its nid is
    /// known, which the hierarchy-event refresh path needs.
    by_nid: HashMap<Nid, ElementId>,
    /// Which nids each session currently holds (session-scoped locks, and
    /// open-scoped locks attached via `add_token`). Drives `logout`.
    sessions: HashMap<SessionHandle, HashSet<Nid>>,
    update_depth: u32,
    journal_dirty: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            trie: PathTrie::new(),
            by_nid: HashMap::new(),
            sessions: HashMap::new(),
            update_depth: 0,
            journal_dirty: false,
        }
    }
}

/// The hierarchical lock manager (C2).
pub struct LockRegistry {
    inner: ReentrantMutex<RefCell<Inner>>,
    /// Guards the (stubbed) item-store write that accompanies lock/unlock,
    /// kept separate from `inner` per spec.md §5 so the registry mutex is
    /// never held across an item-store call that could fire events back
    /// into the registry.
    lock_properties: Mutex<()>,
    hierarchy: Arc<dyn HierarchyService>,
    cluster: Option<Arc<dyn ClusterChannel>>,
    journal: Arc<dyn JournalStorage>,
}

impl LockRegistry {
    /// Creates an empty registry, loading any persisted open-scoped locks
    /// from the journal (spec.md §4.2 "Journal").
    pub fn new(
        hierarchy: Arc<dyn HierarchyService>,
        journal: Arc<dyn JournalStorage>,
        cluster: Option<Arc<dyn ClusterChannel>>,
    ) -> Result<Self> {
        let registry = Self {
            inner: ReentrantMutex::new(RefCell::new(Inner::new())),
            lock_properties: Mutex::new(()),
            hierarchy,
            cluster,
            journal,
        };
        registry.load_journal()?;
        Ok(registry)
    }

    fn load_journal(&self) -> Result<()> {
        let Some(contents) = self.journal.load()? else {
            return Ok(());
        };
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let (token_str, timeout_ms) = match line.split_once(',') {
                Some((t, ms)) => match ms.parse::<i64>() {
                    Ok(ms) => (t, ms),
                    Err(_) => {
                        tracing::warn!(line, "skipping journal line with malformed timeout");
                        continue;
                    }
                },
                None => (line, i64::MAX),
            };
            let token: LockToken = match token_str.parse() {
                Ok(t) => t,
                Err(err) => {
                    tracing::warn!(line, %err, "skipping unparsable journal line");
                    continue;
                }
            };
            let nid = token.nid();
            let Some(path) = self.hierarchy.resolve(nid) else {
                tracing::warn!(%nid, "journal references a node that no longer resolves, dropping");
                continue;
            };
            // Only the token and timeout survive in the journal; `deep`
            // and `owner` live on the node's lock properties in the item
            // store, which is out of this crate's scope, so they are
            // reinstalled with conservative defaults.
            let record = LockRecord {
                holder_nid: nid,
                deep: false,
                session_scoped: false,
                owner_string: String::new(),
                timeout_hint_ms: timeout_ms,
                created_at: Instant::now(),
                live: true,
                current_holder_session: None,
            };
            let element = inner.trie.put(path.as_path(), record);
            inner.by_nid.insert(nid, element);
        }
        Ok(())
    }

    fn resolve(&self, nid: Nid) -> Result<PathBuf> {
        self.hierarchy.resolve(nid).ok_or(Error::NodeNotFound)
    }

    /// The closest existing ancestor that carries a live record governs:
    /// the invariant that no second record can exist under a live deep
    /// record makes it decisive. Read-only, reused by [`LockRegistry::lock`]
    /// and by [`LockRegistry::validate_lock`] (the latter backs
    /// [`crate::overlay::TransactionalOverlay::prepare`]'s revalidation).
    fn check_lock_conflict(&self, inner: &Inner, path: Path, deep: bool) -> Result<()> {
        if let Some((element, exact)) = inner.trie.map(path, false) {
            if let Some(record) = inner.trie.payload(element) {
                if record.live {
                    if exact {
                        return Err(Error::AlreadyLocked);
                    } else if record.deep {
                        return Err(Error::ParentDeepLocked);
                    }
                }
            }
        }
        if deep {
            if let Some((element, true)) = inner.trie.map(path, true) {
                let mut blocked = false;
                inner.trie.traverse_from(
                    element,
                    |e| {
                        if e == element {
                            return;
                        }
                        if let Some(record) = inner.trie.payload(e) {
                            if record.live {
                                blocked = true;
                            }
                        }
                    },
                    true,
                );
                if blocked {
                    return Err(Error::ChildLocked);
                }
            }
        }
        Ok(())
    }

    /// Read-only counterpart of the validation [`LockRegistry::unlock`]
    /// performs before mutating, reused by [`LockRegistry::validate_unlock`].
    fn check_unlock_conflict(&self, inner: &Inner, path: Path, session: SessionHandle) -> Result<()> {
        let Some((element, true)) = inner.trie.map(path, true) else {
            return Err(Error::NotLocked);
        };
        let Some(record) = inner.trie.payload(element) else {
            return Err(Error::NotLocked);
        };
        if !record.live {
            return Err(Error::NotLocked);
        }
        if record.current_holder_session != Some(session) {
            return Err(Error::NotHolder);
        }
        Ok(())
    }

    /// Validates that locking `nid` would not conflict with currently
    /// committed state, without mutating the registry (spec.md §4.3
    /// "prepare").
    pub fn validate_lock(&self, nid: Nid, deep: bool) -> Result<()> {
        let path = self.resolve(nid)?;
        let guard = self.inner.lock();
        let inner = guard.borrow();
        self.check_lock_conflict(&inner, path.as_path(), deep)
    }

    /// Validates that `session` could unlock `nid` given currently
    /// committed state, without mutating the registry (spec.md §4.3
    /// "prepare").
    pub fn validate_unlock(&self, nid: Nid, session: SessionHandle) -> Result<()> {
        let path = self.resolve(nid)?;
        let guard = self.inner.lock();
        let inner = guard.borrow();
        self.check_unlock_conflict(&inner, path.as_path(), session)
    }

    /// Locks the node identified by `nid`.
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
        let path = self.resolve(nid)?;
        let guard = self.inner.lock();
        {
            let inner = guard.borrow();
            self.check_lock_conflict(&inner, path.as_path(), deep)?;
        }
        let mut inner = guard.borrow_mut();
        let record = LockRecord {
            holder_nid: nid,
            deep,
            session_scoped,
            owner_string: owner.into(),
            timeout_hint_ms,
            created_at: Instant::now(),
            live: true,
            current_holder_session: Some(session),
        };
        let element = inner.trie.put(path.as_path(), record);
        inner.by_nid.insert(nid, element);
        inner.sessions.entry(session).or_default().insert(nid);
        drop(inner);
        self.write_lock_properties();
        self.on_lock_committed(&guard, nid, deep, session_scoped);
        Ok(LockToken::new(nid))
    }

    fn write_lock_properties(&self) {
        // Placeholder for the (external) item-store write that records
        // lock metadata as node properties. Held under `lock_properties`,
        // never under the trie mutex, so the item store's event callback
        // into this registry cannot deadlock.
        let _guard = self.lock_properties.lock();
    }

    fn on_lock_committed(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<Inner>>,
        nid: Nid,
        deep: bool,
        session_scoped: bool,
    ) {
        if !session_scoped {
            self.persist_or_defer(guard);
            if let Some(cluster) = &self.cluster {
                let owner = {
                    let inner = guard.borrow();
                    inner
                        .by_nid
                        .get(&nid)
                        .and_then(|e| inner.trie.payload(*e))
                        .map(|r| r.owner_string.clone())
                        .unwrap_or_default()
                };
                cluster.announce_lock(nid, deep, &owner);
            }
        }
        tracing::info!(%nid, deep, session_scoped, "lock granted");
    }

    /// Releases the lock on `nid` held by `session`.
    pub fn unlock(&self, nid: Nid, session: SessionHandle) -> Result<()> {
        let path = self.resolve(nid)?;
        let guard = self.inner.lock();
        {
            let inner = guard.borrow();
            self.check_unlock_conflict(&inner, path.as_path(), session)?;
        }
        {
            let mut inner = guard.borrow_mut();
            let (element, _) = inner
                .trie
                .map(path.as_path(), true)
                .expect("validated by check_unlock_conflict above");
            let session_scoped = inner
                .trie
                .payload(element)
                .map(|r| r.session_scoped)
                .unwrap_or(false);
            inner.trie.clear_payload(element);
            inner.by_nid.remove(&nid);
            if let Some(nids) = inner.sessions.get_mut(&session) {
                nids.remove(&nid);
            }
            drop(inner);
            self.on_unlock_committed(&guard, nid, session_scoped);
        }
        Ok(())
    }

    fn on_unlock_committed(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<Inner>>,
        nid: Nid,
        session_scoped: bool,
    ) {
        if !session_scoped {
            self.persist_or_defer(guard);
            if let Some(cluster) = &self.cluster {
                cluster.announce_unlock(nid);
            }
        }
        tracing::info!(%nid, "lock released");
    }

    fn persist_or_defer(&self, guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<Inner>>) {
        let mut inner = guard.borrow_mut();
        if inner.update_depth > 0 {
            inner.journal_dirty = true;
            return;
        }
        drop(inner);
        self.persist_now(guard);
    }

    fn persist_now(&self, guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<Inner>>) {
        let lines = self.serialize_journal(guard);
        if let Err(err) = self.journal.save(&lines) {
            tracing::warn!(%err, "failed to persist lock journal, in-memory state remains authoritative");
        } else {
            guard.borrow_mut().journal_dirty = false;
        }
    }

    fn serialize_journal(&self, guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<Inner>>) -> String {
        let inner = guard.borrow();
        let mut lines = String::new();
        inner.trie.traverse(
            |element| {
                if let Some(record) = inner.trie.payload(element) {
                    if record.live && !record.session_scoped {
                        let token = record.token();
                        if record.timeout_hint_ms == i64::MAX {
                            lines.push_str(&format!("{}\n", token));
                        } else {
                            lines.push_str(&format!("{},{}\n", token, record.timeout_hint_ms));
                        }
                    }
                }
            },
            false,
        );
        lines
    }

    fn applicable<'a>(&self, inner: &'a Inner, path: Path) -> Option<&'a LockRecord> {
        let (element, exact) = inner.trie.map(path, false)?;
        let record = inner.trie.payload(element)?;
        if !record.live {
            return None;
        }
        if exact || record.deep {
            Some(record)
        } else {
            None
        }
    }

    /// Succeeds if no live lock applies to `path`, or the applicable lock
    /// is held by `session`.
    pub fn check_lock(&self, path: Path, session: SessionHandle) -> Result<()> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        match self.applicable(&inner, path) {
            None => Ok(()),
            Some(record) if record.current_holder_session == Some(session) => Ok(()),
            Some(_) => Err(Error::Locked),
        }
    }

    /// Returns the applicable lock record for `nid`, if any. A node that no
    /// longer resolves is treated as unlocked, not an error.
    pub fn get_lock(&self, nid: Nid) -> Option<LockRecord> {
        let path = self.hierarchy.resolve(nid)?;
        let guard = self.inner.lock();
        let inner = guard.borrow();
        self.applicable(&inner, path.as_path()).cloned()
    }

    /// True if `nid`'s applicable lock (if any) is held by `session`.
    pub fn holds_lock(&self, nid: Nid, session: SessionHandle) -> bool {
        self.get_lock(nid)
            .map(|r| r.current_holder_session == Some(session))
            .unwrap_or(false)
    }

    /// True if any live lock applies to `nid`.
    pub fn is_locked(&self, nid: Nid) -> bool {
        self.get_lock(nid).is_some()
    }

    /// Attaches an open-scoped lock's ownership to `session`.
    pub fn add_token(&self, session: SessionHandle, token: LockToken) -> Result<()> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let nid = token.nid();
        let Some(&element) = inner.by_nid.get(&nid) else {
            return Err(Error::NotLocked);
        };
        let record = inner.trie.payload_mut(element).ok_or(Error::NotLocked)?;
        if !record.live {
            return Err(Error::NotLocked);
        }
        match record.current_holder_session {
            Some(other) if other != session => return Err(Error::OtherHolder),
            _ => {}
        }
        record.current_holder_session = Some(session);
        inner.sessions.entry(session).or_default().insert(nid);
        Ok(())
    }

    /// Detaches an open-scoped lock from its current holder, leaving it
    /// unattached so another session may later re-attach.
    pub fn remove_token(&self, session: SessionHandle, token: LockToken) -> Result<()> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let nid = token.nid();
        let Some(&element) = inner.by_nid.get(&nid) else {
            return Err(Error::NotLocked);
        };
        let record = inner.trie.payload_mut(element).ok_or(Error::NotLocked)?;
        match record.current_holder_session {
            Some(other) if other != session => return Err(Error::OtherHolder),
            _ => {}
        }
        record.current_holder_session = None;
        if let Some(nids) = inner.sessions.get_mut(&session) {
            nids.remove(&nid);
        }
        Ok(())
    }

    /// Releases session-scoped locks held by `session` and detaches any
    /// open-scoped locks it held (spec.md §4.2, §8 property 5).
    pub fn logout(&self, session: SessionHandle) {
        let guard = self.inner.lock();
        let nids: Vec<Nid> = {
            let mut inner = guard.borrow_mut();
            inner.sessions.remove(&session).unwrap_or_default().into_iter().collect()
        };
        let mut to_unlock = Vec::new();
        {
            let mut inner = guard.borrow_mut();
            for nid in nids {
                let Some(&element) = inner.by_nid.get(&nid) else {
                    continue;
                };
                let session_scoped = match inner.trie.payload(element) {
                    Some(r) => r.session_scoped,
                    None => continue,
                };
                if session_scoped {
                    inner.trie.clear_payload(element);
                    inner.by_nid.remove(&nid);
                    to_unlock.push((nid, false));
                } else if let Some(record) = inner.trie.payload_mut(element) {
                    record.current_holder_session = None;
                }
            }
        }
        for (nid, _) in to_unlock {
            self.on_unlock_committed(&guard, nid, true);
        }
        tracing::info!(?session, "session logged out, locks released/detached");
    }

    /// Begins a batched update: a guard that, while held, suppresses
    /// intermediate journal writes triggered by `lock`/`unlock` calls on
    /// this thread, persisting once when the outermost guard is dropped
    /// (spec.md §5, §9 "Reentrant mutex for update batching").
    pub fn begin_update(&self) -> UpdateBatch<'_> {
        let guard = self.inner.lock();
        guard.borrow_mut().update_depth += 1;
        UpdateBatch {
            registry: self,
            guard,
            canceled: false,
        }
    }

    /// Refreshes the subtree rooted at `parent` after a hierarchy ADD,
    /// REMOVE, or MOVE affecting it: every record currently under the
    /// subtree is cleared, then reinserted at its holder's current path as
    /// resolved by the hierarchy service. A record whose holder no longer
    /// resolves is marked non-live; if it was open-scoped its removal is
    /// persisted (spec.md §4.2 "Hierarchy event handling").
    pub fn refresh(&self, parent: Path) {
        let guard = self.inner.lock();
        let records: Vec<LockRecord> = {
            let inner = guard.borrow();
            let mut out = Vec::new();
            if let Some((element, true)) = inner.trie.map(parent, true) {
                inner.trie.traverse_from(
                    element,
                    |e| {
                        if let Some(record) = inner.trie.payload(e) {
                            out.push(record.clone());
                        }
                    },
                    true,
                );
            }
            out
        };
        if records.is_empty() {
            return;
        }
        {
            let mut inner = guard.borrow_mut();
            inner.trie.remove_subtree(parent);
            for nid in records.iter().map(|r| r.holder_nid) {
                inner.by_nid.remove(&nid);
            }
        }
        let mut resave_journal = false;
        {
            let mut inner = guard.borrow_mut();
            for mut record in records {
                match self.hierarchy.resolve(record.holder_nid) {
                    Some(new_path) => {
                        let element = inner.trie.put(new_path.as_path(), record.clone());
                        inner.by_nid.insert(record.holder_nid, element);
                    }
                    None => {
                        record.live = false;
                        tracing::warn!(
                            nid = %record.holder_nid,
                            "lock holder no longer resolves after hierarchy event, marking non-live"
                        );
                        if !record.session_scoped {
                            resave_journal = true;
                        }
                    }
                }
            }
        }
        if resave_journal {
            self.persist_or_defer(&guard);
        }
    }

    /// Applies an inbound cluster lock event, bypassing any transactional
    /// overlay (spec.md §4.3, §6).
    pub fn apply_external_lock(&self, nid: Nid, deep: bool, owner: impl Into<String>) {
        let Some(path) = self.hierarchy.resolve(nid) else {
            tracing::warn!(%nid, "external lock for unresolvable node, ignoring");
            return;
        };
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let record = LockRecord {
            holder_nid: nid,
            deep,
            session_scoped: false,
            owner_string: owner.into(),
            timeout_hint_ms: i64::MAX,
            created_at: Instant::now(),
            live: true,
            current_holder_session: None,
        };
        let element = inner.trie.put(path.as_path(), record);
        inner.by_nid.insert(nid, element);
    }

    /// Applies an inbound cluster unlock event.
    pub fn apply_external_unlock(&self, nid: Nid) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(element) = inner.by_nid.remove(&nid) {
            inner.trie.clear_payload(element);
        }
    }

    /// Runs one pass of the timeout handler (spec.md §4.2 "Timeout
    /// handler"), expiring any record whose `timeout_hint_ms` has elapsed.
    /// Intended to be driven by a periodic scheduled worker at a fixed
    /// interval (default 1s, see [`crate::Config`]-equivalent in the host
    /// crate).
    pub fn expire_timed_out(&self) {
        let now = Instant::now();
        let guard = self.inner.lock();
        let expired: Vec<(Nid, bool)> = {
            let inner = guard.borrow();
            let mut out = Vec::new();
            inner.trie.traverse(
                |e| {
                    if let Some(record) = inner.trie.payload(e) {
                        if record.live && record.is_expired(now) {
                            out.push((record.holder_nid, record.current_holder_session.is_none()));
                        }
                    }
                },
                true,
            );
            out
        };
        for (nid, needs_system_holder) in expired {
            let session = if needs_system_holder {
                SessionHandle::SYSTEM
            } else {
                let inner = guard.borrow();
                inner
                    .by_nid
                    .get(&nid)
                    .and_then(|e| inner.trie.payload(*e))
                    .and_then(|r| r.current_holder_session)
                    .unwrap_or(SessionHandle::SYSTEM)
            };
            if let Err(err) = self.force_unlock_for_expiry(nid, session) {
                tracing::warn!(%nid, %err, "failed to expire lock");
            } else {
                tracing::info!(%nid, "lock expired");
            }
        }
    }

    fn force_unlock_for_expiry(&self, nid: Nid, session: SessionHandle) -> Result<()> {
        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            if let Some(&element) = inner.by_nid.get(&nid) {
                if let Some(record) = inner.trie.payload_mut(element) {
                    record.current_holder_session = Some(session);
                }
            }
        }
        drop(guard);
        self.unlock(nid, session)
    }
}

/// RAII guard for the `begin_update`/`end_update`/`cancel_update` batching
/// protocol. Dropping the guard is equivalent to `end_update`: it persists
/// the journal once if any batched operation would otherwise have written
/// it. Calling [`UpdateBatch::cancel`] instead discards any buffered write.
pub struct UpdateBatch<'a> {
    registry: &'a LockRegistry,
    guard: parking_lot::ReentrantMutexGuard<'a, RefCell<Inner>>,
    canceled: bool,
}

impl<'a> UpdateBatch<'a> {
    /// Ends the batch without persisting a buffered journal write.
    pub fn cancel(mut self) {
        self.canceled = true;
    }
}

impl<'a> Drop for UpdateBatch<'a> {
    fn drop(&mut self) {
        let depth = {
            let mut inner = self.guard.borrow_mut();
            inner.update_depth -= 1;
            inner.update_depth
        };
        if depth > 0 {
            return;
        }
        if self.canceled {
            self.guard.borrow_mut().journal_dirty = false;
            return;
        }
        let dirty = self.guard.borrow().journal_dirty;
        if dirty {
            self.registry.persist_now(&self.guard);
        }
    }
}
