//! Node-scoped access-control engine: per-node ACLs (C6), an inheritance-
//! walking entry collector (C7), per-session compiled permissions (C8), a
//! change notifier that keeps both caches coherent (C9), and the policy
//! provider that orchestrates all four and seeds a workspace's default
//! root policy (C10).
//!
//! This crate has no opinion on locking (see the sibling `ward-tree`
//! crate, which it depends on only for [`ward_tree::Nid`] and
//! [`ward_tree::PathBuf`]) or on how the content tree, principals, or the
//! cluster channel are actually implemented — those are supplied by the
//! host through the traits in [`external`].

pub mod collector;
pub mod error;
pub mod external;
pub mod notifier;
pub mod permissions;
pub mod privilege;
pub mod provider;
pub mod store;

pub use collector::{Collected, EffectiveEntries, EntryCollector};
pub use error::{Error, Result};
pub use external::{PolicyStore, PrincipalResolver, RawAce};
pub use notifier::{AclClusterChannel, ChangeNotifier, PolicyChangeKind};
pub use permissions::{calculate_permissions, CompiledPermissions, CompiledResult, ReadCacheInvalidation};
pub use privilege::{names_from_privileges, privilege_by_name, privileges_from_names, PermBits, PrivBits};
pub use provider::{DefaultPolicyProvider, PolicyProvider};
pub use store::{entry_from_raw, AccessControlList, Entry, Glob};
