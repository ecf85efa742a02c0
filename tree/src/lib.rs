//! Hierarchical path trie, lock registry, and transactional overlay over a
//! content repository's tree-shaped namespace.
//!
//! This crate owns the C1-C5 components: the path/trie model, the
//! mutex-guarded lock registry, the transactional overlay used by
//! in-progress writes, the hierarchy-event consolidator, and the lock
//! token codec. It has no opinion on access control (see the sibling
//! `ward-acl` crate) or on how sessions, principals, or the item store
//! are implemented — those are supplied by the host through the traits in
//! [`external`].

pub mod consolidator;
pub mod error;
pub mod external;
pub mod lock;
pub mod nid;
pub mod overlay;
pub mod path;
pub mod token;
mod trie;

pub use consolidator::{consolidate, Event, RawEvent};
pub use error::{Error, Result};
pub use external::{ClusterChannel, HierarchyService, JournalStorage, MemoryJournal, SessionHandle};
pub use lock::{LockRecord, LockRegistry, UpdateBatch};
pub use nid::{Nid, ParseNidError};
pub use overlay::TransactionalOverlay;
pub use path::{Path, PathBuf, ParsePathError, Segment};
pub use token::{LockToken, ParseTokenError};
pub use trie::{ElementId, PathTrie};
