//! C10 — the policy provider.
//!
//! Orchestrates C6-C9: seeds a workspace with a default root policy,
//! exposes the small capability set a host needs (read a node's effective
//! policy, compile permissions for a principal set, check root
//! accessibility) behind the [`PolicyProvider`] trait so a different
//! concrete ACL engine could be swapped in without touching callers
//! (spec.md §4.10, §9 "Dynamic dispatch of permission evaluation").

use crate::collector::EntryCollector;
use crate::external::{PolicyStore, PrincipalResolver};
use crate::notifier::{AclClusterChannel, ChangeNotifier, PolicyChangeKind};
use crate::permissions::CompiledPermissions;
use crate::privilege::PrivBits;
use crate::store::{entry_from_raw, AccessControlList, Entry};
use std::collections::HashSet;
use std::sync::Arc;
use ward_tree::Nid;

/// The capability set a host needs from an access-control engine,
/// independent of its concrete implementation.
pub trait PolicyProvider: Send + Sync {
    /// The effective (locally declared) entries at `nid`, empty if `nid` is
    /// not access-controlled.
    fn effective_policies(&self, nid: Nid) -> Vec<Entry>;

    /// Compiles a permission evaluator for a session authenticated with
    /// `principal_names`.
    fn compile_permissions(&self, principal_names: HashSet<String>) -> Arc<CompiledPermissions>;

    /// True if `principal_names` can read `root`.
    fn can_access_root(&self, root: Nid, principal_names: &HashSet<String>) -> bool;
}

/// The concrete ACL engine: one [`EntryCollector`] (C7), one
/// [`ChangeNotifier`] (C9), and the default root-seeding policy (C10).
pub struct DefaultPolicyProvider {
    content: Arc<dyn PolicyStore>,
    principals: Arc<dyn PrincipalResolver>,
    collector: Arc<EntryCollector>,
    notifier: Arc<ChangeNotifier>,
    administrators_principal: String,
    everyone_principal: String,
    read_cache_size: usize,
}

impl DefaultPolicyProvider {
    /// Creates a provider over `content`, resolving principals through
    /// `principals`. `entry_collector_cache_size` and `read_cache_size`
    /// bound C7's and each compiled permission instance's caches (spec.md
    /// §6 `cachingEntryCollector.maxSize` / `readCache.maxSize`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: Arc<dyn PolicyStore>,
        principals: Arc<dyn PrincipalResolver>,
        cluster: Option<Arc<dyn AclClusterChannel>>,
        entry_collector_cache_size: usize,
        read_cache_size: usize,
        administrators_principal: impl Into<String>,
        everyone_principal: impl Into<String>,
    ) -> Self {
        let collector = Arc::new(EntryCollector::new(
            content.clone(),
            principals.clone(),
            entry_collector_cache_size,
        ));
        let notifier = Arc::new(ChangeNotifier::new(collector.clone(), cluster));
        Self {
            content,
            principals,
            collector,
            notifier,
            administrators_principal: administrators_principal.into(),
            everyone_principal: everyone_principal.into(),
            read_cache_size,
        }
    }

    /// The shared change notifier, for a host to drive from its own
    /// content-event dispatch.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Seeds `root` with the default policy unless `omit_default_permissions`
    /// is set or `root` is already access-controlled (spec.md §4.10):
    /// `allow ALL` to the administrators principal (if it exists) and
    /// `allow READ` to the everyone principal (if it exists). If the
    /// administrators principal does not exist, only the everyone grant is
    /// installed.
    pub fn init_workspace(&self, root: Nid, omit_default_permissions: bool) {
        if omit_default_permissions || self.content.is_access_controlled(root) {
            return;
        }
        self.content.mark_access_controlled(root);
        let mut acl = AccessControlList::new();
        if self.principals.exists(&self.administrators_principal) {
            acl.add_entry(self.administrators_principal.clone(), true, PrivBits::ALL, None);
        }
        if self.principals.exists(&self.everyone_principal) {
            acl.add_entry(self.everyone_principal.clone(), true, PrivBits::READ, None);
        }
        self.content.set_local_entries(root, acl.to_raw());
        self.notifier.on_policy_change(root, PolicyChangeKind::Added);
        tracing::info!(%root, "installed default root policy");
    }
}

impl PolicyProvider for DefaultPolicyProvider {
    fn effective_policies(&self, nid: Nid) -> Vec<Entry> {
        self.content
            .local_entries(nid)
            .iter()
            .filter_map(|raw| match entry_from_raw(raw) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(%nid, %err, "skipping ACE with unrecognized privilege");
                    None
                }
            })
            .collect()
    }

    fn compile_permissions(&self, principal_names: HashSet<String>) -> Arc<CompiledPermissions> {
        let compiled = CompiledPermissions::new(
            self.content.clone(),
            self.collector.clone(),
            principal_names,
            self.read_cache_size,
        );
        self.notifier.register_listener(compiled.listener_handle());
        compiled
    }

    fn can_access_root(&self, root: Nid, principal_names: &HashSet<String>) -> bool {
        self.compile_permissions(principal_names.clone()).can_read(root)
    }
}
