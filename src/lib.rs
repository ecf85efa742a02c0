//! `ward`: a hierarchical lock manager and access-control engine for a
//! content repository's tree-shaped namespace.
//!
//! This crate wires [`ward_tree`]'s path trie, lock registry, and
//! transactional overlay together with [`ward_acl`]'s ACL store, entry
//! collector, and compiled permissions behind a single [`Repository`]
//! facade, and owns the process-wide [`Config`] both subsystems are
//! parameterized by.

pub mod config;
pub mod fs_journal;
pub mod repository;

pub use config::Config;
pub use fs_journal::FileJournal;
pub use repository::Repository;

pub use ward_acl as acl;
pub use ward_tree as tree;
